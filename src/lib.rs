//! Voicebridge - turn-taking voice conversation relay
//!
//! Browser clients stream microphone audio over a WebSocket. For each
//! connection the relay detects the end of an utterance, sends it through
//! speech recognition, a chat completion model and speech synthesis, and
//! streams the transcript, reply text and reply audio back. The client may
//! interrupt at any point.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Browser clients (WS)                 │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │  api         gateway  │  /health  │  /status          │
//! ├──────────────────────────────────────────────────────┤
//! │  session     registry │  coordinator │  aggregator    │
//! │              history  │  worker pool                  │
//! ├──────────────────────────────────────────────────────┤
//! │  voice       STT  │  LLM  │  TTS                      │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    ConnectionRegistry, ConversationState, CoordinatorHandle, Stage, TurnCoordinator, WorkerPool,
};
pub use voice::{Collaborators, ReplyGenerator, SpeechRecognizer, SpeechSynthesizer};
