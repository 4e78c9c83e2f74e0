//! External speech and language collaborators
//!
//! The turn pipeline only sees three capabilities. Each concrete client owns its
//! own credentials and token lifecycle.

mod audio;
mod llm;
mod stt;
mod token;
mod tts;

use std::sync::Arc;

use async_trait::async_trait;

pub use audio::{TONE_SAMPLE_RATE, cached_fallback_tone, fallback_tone, pcm16_to_wav};
pub use llm::ChatCompletions;
pub use stt::SpeechToText;
pub use token::AccessTokenCache;
pub use tts::TextToSpeech;

use crate::session::Turn;
use crate::{Config, Result};

/// Turns raw audio into text
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize one utterance of raw 16-bit mono PCM
    ///
    /// # Errors
    ///
    /// Returns `Error::Recognition` when nothing usable was recognized
    async fn recognize(&self, audio: &[u8]) -> Result<String>;
}

/// Produces the assistant's reply to a user turn
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply to `text` given the recent conversation
    ///
    /// # Errors
    ///
    /// Returns `Error::Generation` when no reply was produced
    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String>;
}

/// Turns reply text into encoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` to an encoded audio payload
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` when no audio was produced
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// The three collaborators a turn pipeline calls, shared by all connections
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Collaborators {
    /// Build the HTTP collaborators named by the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any provider is missing credentials
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            recognizer: Arc::new(SpeechToText::from_config(
                &config.stt,
                config.audio.sample_rate,
            )?),
            generator: Arc::new(ChatCompletions::from_config(&config.llm)?),
            synthesizer: Arc::new(TextToSpeech::from_config(&config.tts)?),
        })
    }
}
