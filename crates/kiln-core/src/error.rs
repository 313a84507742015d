//! Unified error types for kiln
//!
//! Malformed artifacts, validation problems and failed repairs are data
//! ([`crate::ParseFailure`], [`crate::ValidationError`]), never errors. This
//! enum only covers conditions that abort the current call.

use thiserror::Error;

/// Unified error type for all kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    // Stream errors
    #[error("Empty stream: finished without receiving any fragment")]
    EmptyStream,

    #[error("Stream {0} already finished")]
    StreamFinished(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;
