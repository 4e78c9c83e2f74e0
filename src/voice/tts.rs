//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::SpeechSynthesizer;
use super::token::{AccessTokenCache, BAIDU_TOKEN_URL};
use crate::config::{TtsConfig, TtsProvider};
use crate::{Error, Result};

/// Default Baidu synthesis endpoint
const BAIDU_TTS_URL: &str = "https://tsn.baidu.com/text2audio";

/// Default `OpenAI`-compatible base URL
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Device identifier reported to Baidu
const CUID: &str = "voicebridge";

enum Backend {
    Baidu {
        url: String,
        tokens: AccessTokenCache,
    },
    OpenAI {
        base_url: String,
        api_key: SecretString,
        model: String,
        voice: String,
        speed: f32,
    },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    backend: Backend,
}

impl TextToSpeech {
    /// Build the synthesizer described by the TTS configuration
    ///
    /// # Errors
    ///
    /// Returns error if the provider's credentials are missing
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("TTS API key required".to_string()))?;

        let backend = match config.provider {
            TtsProvider::Baidu => {
                let secret = config
                    .secret_key
                    .as_ref()
                    .map(|k| k.expose_secret().to_string())
                    .ok_or_else(|| Error::Config("Baidu TTS secret key required".to_string()))?;
                Backend::Baidu {
                    url: config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| BAIDU_TTS_URL.to_string()),
                    tokens: AccessTokenCache::new(
                        client.clone(),
                        BAIDU_TOKEN_URL,
                        SecretString::from(api_key),
                        SecretString::from(secret),
                    ),
                }
            }
            TtsProvider::OpenAI => Backend::OpenAI {
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                api_key: SecretString::from(api_key),
                model: config.model.clone(),
                voice: config.voice.clone(),
                speed: config.speed,
            },
        };

        Ok(Self { client, backend })
    }

    /// Synthesize using Baidu `text2audio`
    ///
    /// Success is an MP3 body; a JSON body carries an error.
    async fn synthesize_baidu(
        &self,
        url: &str,
        tokens: &AccessTokenCache,
        text: &str,
    ) -> Result<Vec<u8>> {
        let token = tokens.token(Error::Synthesis).await?;
        let params = [
            ("tex", text),
            ("tok", token.as_str()),
            ("cuid", CUID),
            ("ctp", "1"),
            ("lan", "zh"),
            ("spd", "5"),
            ("pit", "5"),
            ("vol", "5"),
            ("per", "0"),
            ("aue", "3"),
        ];

        let response = self
            .client
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if !status.is_success() || is_json {
            let body = response.text().await.unwrap_or_default();
            if body.contains("\"err_no\":502") {
                tokens.invalidate().await;
            }
            return Err(Error::Synthesis(format!("Baidu TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(
        &self,
        base_url: &str,
        api_key: &SecretString,
        request: TtsRequest<'_>,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{base_url}/v1/audio/speech"))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.chars().count(), "starting synthesis");

        let audio = match &self.backend {
            Backend::Baidu { url, tokens } => self.synthesize_baidu(url, tokens, text).await?,
            Backend::OpenAI {
                base_url,
                api_key,
                model,
                voice,
                speed,
            } => {
                let request = TtsRequest {
                    model,
                    input: text,
                    voice,
                    speed: *speed,
                };
                self.synthesize_openai(base_url, api_key, request).await?
            }
        };

        if audio.is_empty() {
            return Err(Error::Synthesis("empty audio".to_string()));
        }
        tracing::info!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}
