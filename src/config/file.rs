//! TOML configuration file loading
//!
//! Supports `~/.config/voicebridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoicebridgeConfigFile {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Utterance detection configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Turn pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Chat completion endpoint
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech recognition endpoint
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis endpoint
    #[serde(default)]
    pub tts: TtsFileConfig,
}

/// Listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Largest accepted WebSocket frame
    pub max_message_bytes: Option<usize>,
}

/// Utterance detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Silence after the last chunk that ends an utterance
    pub quiet_interval_ms: Option<u64>,
    pub min_chunks: Option<usize>,
    pub min_bytes: Option<usize>,
    pub sample_rate: Option<u32>,
}

/// Turn pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    pub worker_pool_size: Option<usize>,
    pub recognition_timeout_secs: Option<u64>,
    pub generation_timeout_secs: Option<u64>,
    pub synthesis_timeout_secs: Option<u64>,
    pub history_cap: Option<usize>,
    pub history_rounds: Option<usize>,
}

/// Chat completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "baidu" or "whisper"
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "baidu" or "openai"
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoicebridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoicebridgeConfigFile {
    config_file_path().map_or_else(VoicebridgeConfigFile::default, |p| load_config_file_from(&p))
}

/// Load the TOML config file from an explicit path
///
/// Same fallback rules as [`load_config_file`].
pub fn load_config_file_from(path: &Path) -> VoicebridgeConfigFile {
    if !path.exists() {
        return VoicebridgeConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoicebridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoicebridgeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicebridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicebridge").join("config.toml"))
}
