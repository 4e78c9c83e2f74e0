//! Configuration management for the voicebridge relay
//!
//! Values resolve in the order CLI flag > environment > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::VoicebridgeConfigFile;

/// Default system prompt for the reply generator
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an efficient voice assistant. Answer in the \
    simplest possible words, within fifty words, giving the core answer directly without \
    explaining the process.";

/// Voicebridge relay configuration
#[derive(Debug)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Utterance detection configuration
    pub audio: AudioConfig,

    /// Turn pipeline configuration
    pub pipeline: PipelineConfig,

    /// Chat completion endpoint
    pub llm: LlmConfig,

    /// Speech recognition endpoint
    pub stt: SttConfig,

    /// Speech synthesis endpoint
    pub tts: TtsConfig,
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted WebSocket frame
    pub max_message_bytes: usize,
}

/// Utterance detection configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Silence after the last chunk that ends an utterance
    pub quiet_interval: Duration,
    /// Buffered chunk count that makes an utterance worth recognizing
    pub min_chunks: usize,
    /// Buffered byte count that makes an utterance worth recognizing
    pub min_bytes: usize,
    /// PCM sample rate of inbound audio
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_millis(1000),
            min_chunks: 3,
            min_bytes: 6400,
            sample_rate: 16_000,
        }
    }
}

/// Turn pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent external calls allowed across all connections
    pub worker_pool_size: usize,
    pub recognition_timeout: Duration,
    pub generation_timeout: Duration,
    pub synthesis_timeout: Duration,
    /// Maximum stored history entries per connection
    pub history_cap: usize,
    /// History rounds sent along with each generation request
    pub history_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 20,
            recognition_timeout: Duration::from_secs(8),
            generation_timeout: Duration::from_secs(15),
            synthesis_timeout: Duration::from_secs(10),
            history_cap: 20,
            history_rounds: 3,
        }
    }
}

/// Chat completion configuration
#[derive(Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
}

/// Speech recognition backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// Baidu short-speech REST API
    Baidu,
    /// `OpenAI`-compatible Whisper transcription
    Whisper,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baidu" => Ok(Self::Baidu),
            "whisper" | "openai" => Ok(Self::Whisper),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    /// Baidu `text2audio` REST API
    Baidu,
    /// `OpenAI`-compatible speech endpoint
    OpenAI,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baidu" => Ok(Self::Baidu),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech recognition configuration
#[derive(Debug)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub api_key: Option<SecretString>,
    /// Client secret for token-based providers
    pub secret_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
}

/// Speech synthesis configuration
#[derive(Debug)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub api_key: Option<SecretString>,
    /// Client secret for token-based providers
    pub secret_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

/// Command-line overrides applied on top of every other source
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or fails validation
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let fc = overrides
            .config_path
            .as_deref()
            .map_or_else(file::load_config_file, file::load_config_file_from);

        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok())?;
        if let Some(host) = &overrides.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = overrides.port {
            config.server.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed
    pub fn from_sources(
        fc: VoicebridgeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let parse_env = |key: &str| -> Result<Option<u64>> {
            env(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|e| Error::Config(format!("{key}: {e}")))
                })
                .transpose()
        };
        let secret = |key: &str, file_value: Option<String>| {
            env(key).or(file_value).map(SecretString::from)
        };

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env("VOICEBRIDGE_HOST")
                .or(fc.server.host)
                .unwrap_or(server_defaults.host),
            port: match env("VOICEBRIDGE_PORT") {
                Some(p) => p
                    .parse()
                    .map_err(|e| Error::Config(format!("VOICEBRIDGE_PORT: {e}")))?,
                None => fc.server.port.unwrap_or(server_defaults.port),
            },
            max_message_bytes: fc
                .server
                .max_message_bytes
                .unwrap_or(server_defaults.max_message_bytes),
        };

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            quiet_interval: parse_env("VOICEBRIDGE_QUIET_INTERVAL_MS")?
                .or(fc.audio.quiet_interval_ms)
                .map_or(audio_defaults.quiet_interval, Duration::from_millis),
            min_chunks: fc.audio.min_chunks.unwrap_or(audio_defaults.min_chunks),
            min_bytes: fc.audio.min_bytes.unwrap_or(audio_defaults.min_bytes),
            sample_rate: fc.audio.sample_rate.unwrap_or(audio_defaults.sample_rate),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            worker_pool_size: parse_env("VOICEBRIDGE_WORKER_POOL_SIZE")?
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
                .or(fc.pipeline.worker_pool_size)
                .unwrap_or(pipeline_defaults.worker_pool_size),
            recognition_timeout: fc
                .pipeline
                .recognition_timeout_secs
                .map_or(pipeline_defaults.recognition_timeout, Duration::from_secs),
            generation_timeout: fc
                .pipeline
                .generation_timeout_secs
                .map_or(pipeline_defaults.generation_timeout, Duration::from_secs),
            synthesis_timeout: fc
                .pipeline
                .synthesis_timeout_secs
                .map_or(pipeline_defaults.synthesis_timeout, Duration::from_secs),
            history_cap: fc.pipeline.history_cap.unwrap_or(pipeline_defaults.history_cap),
            history_rounds: fc
                .pipeline
                .history_rounds
                .unwrap_or(pipeline_defaults.history_rounds),
        };

        let llm = LlmConfig {
            base_url: env("VOICEBRIDGE_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.siliconflow.cn".to_string()),
            model: env("VOICEBRIDGE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "THUDM/glm-4-9b-chat".to_string()),
            api_key: secret("VOICEBRIDGE_LLM_API_KEY", fc.llm.api_key),
            temperature: fc.llm.temperature.unwrap_or(0.5),
            max_tokens: fc.llm.max_tokens.unwrap_or(100),
            system_prompt: fc
                .llm
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let stt_provider = env("VOICEBRIDGE_STT_PROVIDER")
            .or(fc.stt.provider)
            .map_or(Ok(SttProvider::Baidu), |p| p.parse())?;
        let stt = SttConfig {
            provider: stt_provider,
            api_key: secret("VOICEBRIDGE_STT_API_KEY", fc.stt.api_key),
            secret_key: secret("VOICEBRIDGE_STT_SECRET_KEY", fc.stt.secret_key),
            base_url: fc.stt.base_url,
            model: fc.stt.model.unwrap_or_else(|| "whisper-1".to_string()),
        };

        let tts_provider = env("VOICEBRIDGE_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map_or(Ok(TtsProvider::Baidu), |p| p.parse())?;
        let tts = TtsConfig {
            provider: tts_provider,
            api_key: secret("VOICEBRIDGE_TTS_API_KEY", fc.tts.api_key),
            secret_key: secret("VOICEBRIDGE_TTS_SECRET_KEY", fc.tts.secret_key),
            base_url: fc.tts.base_url,
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: fc.tts.voice.unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
        };

        Ok(Self {
            server,
            audio,
            pipeline,
            llm,
            stt,
            tts,
        })
    }

    /// Reject values that would stall or disable the relay
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.audio.quiet_interval.is_zero() {
            return Err(Error::Config("audio.quiet_interval_ms must be positive".to_string()));
        }
        if self.pipeline.worker_pool_size == 0 {
            return Err(Error::Config("pipeline.worker_pool_size must be positive".to_string()));
        }
        for (name, timeout) in [
            ("recognition", self.pipeline.recognition_timeout),
            ("generation", self.pipeline.generation_timeout),
            ("synthesis", self.pipeline.synthesis_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!(
                    "pipeline.{name}_timeout_secs must be positive"
                )));
            }
        }
        if self.pipeline.history_cap == 0 {
            return Err(Error::Config("pipeline.history_cap must be positive".to_string()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// Socket address string for the listener
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            max_message_bytes: 1024 * 1024,
        }
    }
}
