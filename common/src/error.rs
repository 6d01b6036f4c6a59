use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Vector store error: {0}")]
    VectorStore(#[from] qdrant_client::QdrantError),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Narrow classification of conditions worth an in-process retry.
    /// Everything else is left to the queue's redelivery with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Reqwest(err) => err.is_timeout() || err.is_connect(),
            AppError::VectorStore(_) => true,
            AppError::Database(err) => err
                .to_string()
                .contains("Failed to commit transaction due to a read or write conflict"),
            _ => false,
        }
    }
}
