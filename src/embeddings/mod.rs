// Embeddings module
// Chunking of FAQ documents and the embedding model seam

pub mod chunking;

use async_trait::async_trait;

use crate::{FaqError, Result};

pub use chunking::{
    ChunkingConfig, DocumentChunk, chunk_document, chunk_documents, estimate_token_count,
    split_text,
};

/// Turns text into dense vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query
    #[inline]
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| FaqError::Embedding("No embedding returned for query".to_string()))
    }
}
