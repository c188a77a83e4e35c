// Database module
// Persistent vector collection for FAQ chunks, backed by LanceDB

pub mod lancedb;

pub use self::lancedb::FaqRecord;
pub use self::lancedb::vector_store::{SearchResult, VectorStore};
