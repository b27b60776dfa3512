//! Unified error types for Loom

use thiserror::Error;

/// Unified error type for all Loom operations
#[derive(Error, Debug)]
pub enum LoomError {
    // Provider errors
    #[error("Provider retries exhausted after {attempts} attempts: {last_error}")]
    ProviderExhausted { attempts: u32, last_error: String },

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    // Session errors
    #[error("Cannot continue message: maximum segments reached ({max_segments})")]
    SegmentLimitExceeded { max_segments: u32 },

    #[error("Session aborted")]
    Aborted,

    #[error("Stream error: {0}")]
    Stream(String),

    // Setup errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Path validation failed: {0}")]
    PathValidation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using LoomError
pub type Result<T> = std::result::Result<T, LoomError>;
