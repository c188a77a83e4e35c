use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FaqError>;

#[derive(Error, Debug)]
pub enum FaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Raw FAQ data not found: {}", .0.display())]
    RawDataNotFound(PathBuf),

    #[error("Vector collection not found at {}", .0.display())]
    CollectionNotFound(PathBuf),

    #[error("Unsupported raw data format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod api;
pub mod chat;
pub mod config;
pub mod database;
pub mod documents;
pub mod embeddings;
pub mod etl;
pub mod llm;
pub mod openai;
