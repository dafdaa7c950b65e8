//! Unified error handling for the runtime.

use strata_engine::ContextId;

use crate::config::ConfigError;

/// Runtime error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] strata_engine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist store snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Context {0} is closed")]
    ContextClosed(ContextId),

    #[error("Job on context {0} panicked")]
    JobAborted(ContextId),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
