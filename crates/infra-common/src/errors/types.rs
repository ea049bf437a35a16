use thiserror::Error;

/// Errors produced by the infrastructure layer itself.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging subsystem could not be initialized
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Event system failure surfaced at the infrastructure boundary
    #[error("Event system error: {0}")]
    Event(#[from] crate::events::types::EventError),
}

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;
