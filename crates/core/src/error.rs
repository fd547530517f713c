//! Error types for the gossipnet crates

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, GossipNetError>;

/// Gossipnet error types
#[derive(Error, Debug)]
pub enum GossipNetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Consensus error: {0}")]
    Consensus(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GossipNetError {
    /// Errors that should terminate the process with exit code 1 (config or
    /// bind problems) rather than 2 (unhandled fault).
    pub fn is_startup_error(&self) -> bool {
        matches!(self, GossipNetError::Config(_) | GossipNetError::Bind(_))
    }
}
