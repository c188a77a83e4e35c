// Query engine
// Retrieval over the FAQ collection plus synthesis, exposed to the agent as a tool


use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::prompts::{QUERY_ENGINE_TOOL_DESCRIPTION, QUERY_ENGINE_TOOL_NAME};
use super::synthesizer::ResponseSynthesizer;
use crate::Result;
use crate::config::DocumentConfig;
use crate::database::VectorStore;
use crate::embeddings::Embedder;
use crate::llm::ToolSpec;

/// A chunk of context selected for a query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Text as shown to the LLM
    pub text: String,
    /// Similarity to the query, higher is better
    pub score: f32,
}

/// Finds context for a query
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

/// Top-K nearest neighbour retrieval from the vector store
pub struct VectorRetriever {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    document_config: DocumentConfig,
}

impl std::fmt::Debug for VectorRetriever {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorRetriever")
            .field("store", &self.store)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl VectorRetriever {
    #[inline]
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
        document_config: DocumentConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            top_k,
            document_config,
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    #[inline]
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let query_vector = self.embedder.embed_query(query).await?;
        let results = self.store.search_similar(&query_vector, self.top_k).await?;

        debug!("Retrieved {} chunks for query", results.len());
        Ok(results
            .into_iter()
            .map(|result| RetrievedChunk {
                text: result.chunk.llm_content(&self.document_config),
                score: result.similarity_score,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ToolInput {
    input: String,
}

/// Retrieve-then-synthesize question answering over the collection
pub struct QueryEngine {
    retriever: Box<dyn Retriever>,
    synthesizer: ResponseSynthesizer,
}

impl std::fmt::Debug for QueryEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    #[inline]
    pub fn new(retriever: Box<dyn Retriever>, synthesizer: ResponseSynthesizer) -> Self {
        Self {
            retriever,
            synthesizer,
        }
    }

    #[inline]
    pub async fn query(&self, query: &str) -> Result<String> {
        let chunks = self.retriever.retrieve(query).await?;
        let texts: Vec<String> = chunks.into_iter().map(|chunk| chunk.text).collect();
        self.synthesizer.synthesize(query, &texts).await
    }

    /// Function definition offered to the agent
    #[inline]
    pub fn tool_spec() -> ToolSpec {
        ToolSpec {
            name: QUERY_ENGINE_TOOL_NAME.to_string(),
            description: QUERY_ENGINE_TOOL_DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string"}
                },
                "required": ["input"]
            }),
        }
    }

    /// Run the tool with the model's raw JSON arguments.
    ///
    /// Malformed arguments become an error message for the model to read;
    /// retrieval and model failures are returned as errors.
    #[inline]
    pub async fn call_tool(&self, arguments: &str) -> Result<String> {
        match serde_json::from_str::<ToolInput>(arguments) {
            Ok(ToolInput { input }) => self.query(&input).await,
            Err(e) => Ok(format!(
                "Error: invalid arguments for {}: {}",
                QUERY_ENGINE_TOOL_NAME, e
            )),
        }
    }
}
