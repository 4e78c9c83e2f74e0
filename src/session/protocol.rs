//! JSON messages exchanged with the browser client

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Message from the client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64-encoded audio chunk
    AudioData { audio: String },
    /// Typed input that skips recognition
    Text { text: String },
    /// Abandon the current turn
    #[serde(alias = "interrupt_tts")]
    Interrupt,
    /// Keepalive
    Ping,
    /// Forget the conversation so far
    Reset,
    StartRecording,
    StopRecording,
}

impl ClientMessage {
    /// Parse one text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` for malformed JSON or an unknown type
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid message: {e}")))
    }
}

/// Decode the payload of an `audio_data` message
///
/// # Errors
///
/// Returns `Error::Protocol` if the payload is not valid base64
pub fn decode_audio(payload: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Protocol(format!("invalid audio payload: {e}")))
}

/// Message to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        connection_id: String,
        message: String,
    },
    AsrResult {
        text: String,
    },
    AsrError {
        message: String,
    },
    LlmResponse {
        text: String,
    },
    /// Synthesized reply; `audio` is base64
    TtsAudio {
        audio: String,
        text: String,
    },
    InterruptionConfirmed {
        message: String,
    },
    Error {
        message: String,
    },
    Pong,
    HistoryCleared {
        message: String,
    },
}

impl ServerMessage {
    pub fn tts_audio(audio: &[u8], text: impl Into<String>) -> Self {
        Self::TtsAudio {
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
            text: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the message type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::AsrResult { .. } => "asr_result",
            Self::AsrError { .. } => "asr_error",
            Self::LlmResponse { .. } => "llm_response",
            Self::TtsAudio { .. } => "tts_audio",
            Self::InterruptionConfirmed { .. } => "interruption_confirmed",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
            Self::HistoryCleared { .. } => "history_cleared",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    message: &'a ServerMessage,
    timestamp: i64,
}

/// Serialize a message with its send timestamp (Unix milliseconds)
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode(message: &ServerMessage) -> Result<String> {
    let envelope = Envelope {
        message,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    Ok(serde_json::to_string(&envelope)?)
}
