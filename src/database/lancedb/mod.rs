// LanceDB vector database module
// Handles vector storage and similarity search for FAQ chunk embeddings


pub mod vector_store;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::DocumentChunk;

/// One embedded FAQ chunk as stored in the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqRecord {
    /// Unique identifier for this record
    pub id: String,
    /// The embedding of the chunk's metadata-rendered text
    pub vector: Vec<f32>,
    /// Id of the FAQ document the chunk came from
    pub document_id: String,
    /// Index of this chunk within its document
    pub chunk_index: u32,
    /// The chunk text
    pub content: String,
    pub question: String,
    pub answer: String,
    pub categories: String,
    pub token_count: u32,
    /// RFC 3339 timestamp of insertion
    pub created_at: String,
}

impl FaqRecord {
    /// Pair a chunk with its embedding
    #[inline]
    pub fn from_chunk(chunk: &DocumentChunk, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            document_id: chunk.document_id.clone(),
            chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
            content: chunk.text.clone(),
            question: chunk.metadata.question.clone(),
            answer: chunk.metadata.answer.clone(),
            categories: chunk.metadata.categories.clone(),
            token_count: u32::try_from(chunk.token_count).unwrap_or(u32::MAX),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
