// Chat engine
// Tool-calling agent over the FAQ query engine, and the factory that wires it up

#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::prompts::{QUERY_ENGINE_TOOL_NAME, SYSTEM_MESSAGE};
use super::query_engine::{QueryEngine, VectorRetriever};
use super::synthesizer::ResponseSynthesizer;
use crate::Result;
use crate::config::Settings;
use crate::database::VectorStore;
use crate::embeddings::Embedder;
use crate::llm::{
    ChatDelta, ChatMessage, ChatModel, DeltaStream, StreamingResponse, ToolCall,
    ToolCallAccumulator, ToolSpec,
};
use crate::openai::OpenAiClient;

pub const DEFAULT_MAX_FUNCTION_CALLS: usize = 5;

/// Builds a fresh chat engine over the persisted collection for every conversation
pub struct ChatEngineFactory {
    settings: Arc<Settings>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
}

impl std::fmt::Debug for ChatEngineFactory {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngineFactory")
            .field("collection", &self.settings.data.collection_name)
            .field("vector_db_path", &self.settings.vector_db_path())
            .finish_non_exhaustive()
    }
}

impl ChatEngineFactory {
    #[inline]
    pub fn new(
        settings: Arc<Settings>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            settings,
            embedder,
            llm,
        }
    }

    /// Factory using one OpenAI client for both embeddings and chat
    #[inline]
    pub fn with_openai(settings: Arc<Settings>, client: OpenAiClient) -> Self {
        let client = Arc::new(client);
        Self::new(
            settings,
            Arc::clone(&client) as Arc<dyn Embedder>,
            client as Arc<dyn ChatModel>,
        )
    }

    /// Open the collection and assemble retriever, synthesizer and agent
    #[inline]
    pub async fn build(&self) -> Result<ChatEngine> {
        let db_path = self.settings.vector_db_path();
        let store = VectorStore::open(&db_path, &self.settings.data.collection_name).await?;
        debug!("Opened collection '{}' at {}", store.collection_name(), db_path.display());

        let retriever = VectorRetriever::new(
            store,
            Arc::clone(&self.embedder),
            self.settings.retrieval.top_k,
            self.settings.document.clone(),
        );
        let synthesizer = ResponseSynthesizer::new(Arc::clone(&self.llm), &self.settings.retrieval);
        let query_engine = QueryEngine::new(Box::new(retriever), synthesizer);

        Ok(ChatEngine::new(Arc::clone(&self.llm), query_engine)
            .with_max_function_calls(self.settings.retrieval.max_function_calls)
            .with_verbose(self.settings.verbose))
    }
}

/// Agent that answers by calling the FAQ query engine as a tool
pub struct ChatEngine {
    llm: Arc<dyn ChatModel>,
    query_engine: QueryEngine,
    system_prompt: String,
    chat_history: Vec<ChatMessage>,
    max_function_calls: usize,
    verbose: bool,
}

impl std::fmt::Debug for ChatEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("query_engine", &self.query_engine)
            .field("chat_history", &self.chat_history.len())
            .field("max_function_calls", &self.max_function_calls)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl ChatEngine {
    #[inline]
    pub fn new(llm: Arc<dyn ChatModel>, query_engine: QueryEngine) -> Self {
        Self {
            llm,
            query_engine,
            system_prompt: SYSTEM_MESSAGE.to_string(),
            chat_history: Vec::new(),
            max_function_calls: DEFAULT_MAX_FUNCTION_CALLS,
            verbose: false,
        }
    }

    #[inline]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    #[inline]
    pub fn with_chat_history(mut self, chat_history: Vec<ChatMessage>) -> Self {
        self.chat_history = chat_history;
        self
    }

    #[inline]
    pub fn with_max_function_calls(mut self, max_function_calls: usize) -> Self {
        self.max_function_calls = max_function_calls;
        self
    }

    #[inline]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Stream the agent's answer to `user_message`.
    ///
    /// Tool calls are resolved before this returns; the returned stream only
    /// carries answer text. After `max_function_calls` tool rounds the tool is
    /// withdrawn so the model has to answer; tool calls it still sends are
    /// dropped, so at most `max_function_calls + 1` requests are made.
    #[inline]
    pub async fn stream_chat(&self, user_message: &str) -> Result<StreamingResponse> {
        let mut messages = Vec::with_capacity(self.chat_history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        messages.extend(self.chat_history.iter().cloned());
        messages.push(ChatMessage::user(user_message));

        let tools = [QueryEngine::tool_spec()];
        let mut rounds = 0;

        loop {
            let limit_reached = rounds >= self.max_function_calls;
            let offered: &[ToolSpec] = if limit_reached {
                debug!("Function call limit of {} reached", self.max_function_calls);
                &[]
            } else {
                &tools[..]
            };

            let mut stream = self.llm.stream_chat(&messages, offered).await?;
            let mut accumulator = ToolCallAccumulator::default();

            while let Some(delta) = stream.next().await {
                match delta? {
                    ChatDelta::Content(text) if accumulator.is_empty() => {
                        return Ok(text_response(text, stream));
                    }
                    ChatDelta::Content(text) => {
                        warn!("Ignoring {} bytes of text mixed into tool calls", text.len());
                    }
                    ChatDelta::ToolCall { name, .. } if limit_reached => {
                        warn!(
                            "Dropping tool call {:?} past the limit of {}",
                            name, self.max_function_calls
                        );
                    }
                    ChatDelta::ToolCall {
                        index,
                        id,
                        name,
                        arguments,
                    } => accumulator.push(index, id.as_deref(), name.as_deref(), &arguments),
                }
            }

            if accumulator.is_empty() {
                debug!("Model returned neither text nor tool calls");
                return Ok(StreamingResponse::new(Box::pin(futures::stream::empty())));
            }

            let calls = accumulator.finish();
            messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
            for call in &calls {
                let output = self.execute_tool_call(call).await?;
                messages.push(ChatMessage::tool(call.id.as_str(), output));
            }
            rounds += 1;
        }
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> Result<String> {
        let name = call.function.name.as_str();
        let arguments = call.function.arguments.as_str();
        if self.verbose {
            info!("=== Calling Function ===");
            info!("Calling function: {} with args: {}", name, arguments);
        } else {
            debug!("Calling function: {} with args: {}", name, arguments);
        }

        let output = if name == QUERY_ENGINE_TOOL_NAME {
            self.query_engine.call_tool(arguments).await?
        } else {
            warn!("Model requested unknown tool '{}'", name);
            format!("Error: tool {} does not exist", name)
        };

        if self.verbose {
            info!("Got output: {}", output);
            info!("========================");
        } else {
            debug!("Got output: {}", output);
        }
        Ok(output)
    }
}

/// Answer stream that starts with `first` and continues with the remaining text deltas
fn text_response(first: String, rest: DeltaStream) -> StreamingResponse {
    let rest = rest.filter_map(|delta| async move {
        match delta {
            Ok(ChatDelta::Content(text)) => Some(Ok(text)),
            Ok(ChatDelta::ToolCall { .. }) => None,
            Err(e) => Some(Err(e)),
        }
    });
    StreamingResponse::new(Box::pin(futures::stream::once(async move { Ok(first) }).chain(rest)))
}
