// crates/vlt-server/src/error.rs
// Standardized error types for vlt

use thiserror::Error;

/// Main error type for the vlt library
#[derive(Error, Debug)]
pub enum VltError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("project not set")]
    ProjectNotSet,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retriever {name} not available: {reason}")]
    RetrieverUnavailable { name: String, reason: String },

    #[error("retriever {name} failed: {message}")]
    Retriever { name: String, message: String },

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync daemon unavailable: {0}")]
    Daemon(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using VltError
pub type Result<T> = std::result::Result<T, VltError>;

impl VltError {
    /// Build a retriever failure tagged with the retriever's name.
    pub fn retriever(name: &str, message: impl Into<String>) -> Self {
        VltError::Retriever {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<String> for VltError {
    fn from(s: String) -> Self {
        VltError::Other(s)
    }
}

impl From<tokio::task::JoinError> for VltError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            VltError::Cancelled
        } else {
            VltError::Other(err.to_string())
        }
    }
}

impl From<VltError> for String {
    fn from(err: VltError) -> Self {
        err.to_string()
    }
}
