use thiserror::Error;

use crate::app::config::ConfigError;
use crate::app::initialization::InitializationError;
use crate::buffer::BufferError;
use crate::sink::ServerError;

/// Top-level error type for the remote sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server definition error: {0}")]
    Server(#[from] ServerError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Initialization error: {0}")]
    Initialization(#[from] InitializationError),

    #[error("Keys still unresolved after {waited_ms}ms: {keys:?}")]
    ResolutionTimeout { keys: Vec<String>, waited_ms: u64 },

    #[error("Diagnostics serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
