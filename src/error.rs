//! Error types for the voicebridge relay

use std::time::Duration;

use thiserror::Error;

use crate::session::Stage;

/// Result type alias for voicebridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voicebridge relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech recognition failed (empty, garbled, or API error)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Reply generation failed
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech synthesis failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Malformed inbound message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Client connection went away
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// An external call exceeded its stage budget
    #[error("{stage:?} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// Audio encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Self::Audio(e.to_string())
    }
}
