
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::OpenAiConfig;
use crate::embeddings::Embedder;
use crate::llm::{ChatDelta, ChatMessage, ChatModel, DeltaStream, ToolSpec};
use crate::{FaqError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Blocking client for an OpenAI-compatible API, exposed to async code through
/// the [`Embedder`] and [`ChatModel`] traits
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    temperature: f32,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for OpenAiClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// One parsed line of a server-sent chat completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Deltas(Vec<ChatDelta>),
    Done,
    Skip,
}

/// Parse one line of an OpenAI `text/event-stream` chat completion body
#[inline]
pub fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(StreamLine::Skip);
    };

    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    if data.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| FaqError::Llm(format!("Failed to parse stream chunk: {}", e)))?;

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            deltas.push(ChatDelta::Content(content));
        }
        for call in choice.delta.tool_calls {
            let (name, arguments) = call
                .function
                .map_or((None, None), |f| (f.name, f.arguments));
            deltas.push(ChatDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments: arguments.unwrap_or_default(),
            });
        }
    }

    Ok(StreamLine::Deltas(deltas))
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let base_url = config.api_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between retries
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FaqError::Other(anyhow::anyhow!("Failed to build {} URL: {}", path, e)))
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Embed `texts` in one request; callers keep batches within the API's input limit
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let url = self.endpoint("embeddings")?;
        let request_json = serde_json::to_string(&EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        })
        .map_err(|e| FaqError::Serialization(format!("Failed to serialize embedding request: {}", e)))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", self.authorization())
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let mut response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| FaqError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        if response.data.len() != texts.len() {
            return Err(FaqError::Embedding(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }

    /// Non-streaming chat completion
    #[inline]
    pub fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = self.endpoint("chat/completions")?;
        let request_json = self.chat_request_json(messages, &[], false)?;

        debug!("Requesting chat completion with {} messages", messages.len());

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", self.authorization())
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| FaqError::Llm(describe_ureq_error(&e)))?;

        let response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| FaqError::Llm(format!("Failed to parse chat response: {}", e)))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// Start a streaming chat completion and return a line reader over the event stream
    #[inline]
    pub fn open_chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<impl BufRead + Send + 'static> {
        let url = self.endpoint("chat/completions")?;
        let request_json = self.chat_request_json(messages, tools, true)?;

        debug!(
            "Opening chat stream with {} messages and {} tools",
            messages.len(),
            tools.len()
        );

        let response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("Authorization", self.authorization())
            .send(&request_json)
            .map_err(|e| FaqError::Llm(describe_ureq_error(&e)))?;

        Ok(BufReader::new(response.into_body().into_reader()))
    }

    fn chat_request_json(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        stream: bool,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature: self.temperature,
            stream,
            tools: tools
                .iter()
                .map(|function| ToolDefinition {
                    kind: "function",
                    function,
                })
                .collect(),
        };

        serde_json::to_string(&request)
            .map_err(|e| FaqError::Serialization(format!("Failed to serialize chat request: {}", e)))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            false
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(FaqError::Embedding(describe_ureq_error(&error)));
                    }

                    last_error = Some(FaqError::Embedding(describe_ureq_error(&error)));

                    if attempt < self.retry_attempts {
                        let factor = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        let delay = self.retry_delay.saturating_mul(factor as u32);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error
            .unwrap_or_else(|| FaqError::Embedding("Request failed after retries".to_string())))
    }
}

fn describe_ureq_error(error: &ureq::Error) -> String {
    match error {
        ureq::Error::StatusCode(status) => format!("HTTP {}", status),
        other => format!("Request error: {}", other),
    }
}

/// Forward parsed stream events until the stream ends or the receiver goes away
fn pump_stream<R: BufRead>(reader: R, tx: &mpsc::Sender<Result<ChatDelta>>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = tx.blocking_send(Err(FaqError::Llm(format!("Stream read failed: {}", e))));
                return;
            }
        };

        match parse_stream_line(&line) {
            Ok(StreamLine::Done) => return,
            Ok(StreamLine::Skip) => {}
            Ok(StreamLine::Deltas(deltas)) => {
                for delta in deltas {
                    if tx.blocking_send(Ok(delta)).is_err() {
                        debug!("Stream receiver dropped, closing chat stream");
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    #[inline]
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.generate_embeddings(&texts))
            .await
            .map_err(|e| FaqError::Embedding(format!("Embedding task failed: {}", e)))?
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    #[inline]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = self.clone();
        let messages = messages.to_vec();
        tokio::task::spawn_blocking(move || client.chat_completion(&messages))
            .await
            .map_err(|e| FaqError::Llm(format!("Chat task failed: {}", e)))?
    }

    #[inline]
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<DeltaStream> {
        let client = self.clone();
        let messages = messages.to_vec();
        let tools = tools.to_vec();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            match client.open_chat_stream(&messages, &tools) {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    pump_stream(reader, &tx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| FaqError::Llm("Chat stream task ended unexpectedly".to_string()))??;

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}
