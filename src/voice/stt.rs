//! Speech-to-text (STT) processing

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};

use super::SpeechRecognizer;
use super::audio::pcm16_to_wav;
use super::token::{AccessTokenCache, BAIDU_TOKEN_URL};
use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result};

/// Default Baidu short-speech endpoint
const BAIDU_ASR_URL: &str = "https://vop.baidu.com/server_api";

/// Default `OpenAI`-compatible base URL for Whisper
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Device identifier reported to Baidu
const CUID: &str = "voicebridge";

/// Response from the Baidu short-speech API
#[derive(serde::Deserialize)]
struct BaiduAsrResponse {
    err_no: i64,
    #[serde(default)]
    err_msg: String,
    #[serde(default)]
    result: Vec<String>,
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

enum Backend {
    Baidu {
        url: String,
        tokens: AccessTokenCache,
    },
    Whisper {
        base_url: String,
        api_key: SecretString,
        model: String,
    },
}

/// Transcribes raw 16-bit mono PCM to text
pub struct SpeechToText {
    client: reqwest::Client,
    backend: Backend,
    sample_rate: u32,
}

impl SpeechToText {
    /// Build the recognizer described by the STT configuration
    ///
    /// # Errors
    ///
    /// Returns error if the provider's credentials are missing
    pub fn from_config(config: &SttConfig, sample_rate: u32) -> Result<Self> {
        let client = reqwest::Client::new();
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("STT API key required".to_string()))?;

        let backend = match config.provider {
            SttProvider::Baidu => {
                let secret = config
                    .secret_key
                    .as_ref()
                    .map(|k| k.expose_secret().to_string())
                    .ok_or_else(|| Error::Config("Baidu STT secret key required".to_string()))?;
                Backend::Baidu {
                    url: config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| BAIDU_ASR_URL.to_string()),
                    tokens: AccessTokenCache::new(
                        client.clone(),
                        BAIDU_TOKEN_URL,
                        SecretString::from(api_key),
                        SecretString::from(secret),
                    ),
                }
            }
            SttProvider::Whisper => Backend::Whisper {
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                api_key: SecretString::from(api_key),
                model: config.model.clone(),
            },
        };

        Ok(Self {
            client,
            backend,
            sample_rate,
        })
    }

    /// Transcribe using the Baidu short-speech API
    async fn transcribe_baidu(
        &self,
        url: &str,
        tokens: &AccessTokenCache,
        audio: &[u8],
    ) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Baidu recognition");

        let token = tokens.token(Error::Recognition).await?;
        let request = serde_json::json!({
            "format": "pcm",
            "rate": self.sample_rate,
            "channel": 1,
            "token": token,
            "cuid": CUID,
            "speech": base64::engine::general_purpose::STANDARD.encode(audio),
            "len": audio.len(),
        });

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Baidu ASR request failed");
                Error::Recognition(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Baidu ASR API error");
            return Err(Error::Recognition(format!("Baidu ASR error {status}: {body}")));
        }

        let result: BaiduAsrResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("invalid ASR response: {e}")))?;

        if result.err_no != 0 {
            // Authentication failures clear the cached token
            if matches!(result.err_no, 3302 | 110 | 111) {
                tokens.invalidate().await;
            }
            tracing::error!(err_no = result.err_no, err_msg = %result.err_msg, "Baidu ASR rejected audio");
            return Err(Error::Recognition(format!(
                "ASR error {}: {}",
                result.err_no, result.err_msg
            )));
        }

        let transcript = result.result.into_iter().next().unwrap_or_default();
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(
        &self,
        base_url: &str,
        api_key: &SecretString,
        model: &str,
        audio: &[u8],
    ) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let wav = pcm16_to_wav(audio, self.sample_rate)?;
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", model.to_string());

        let response = self
            .client
            .post(format!("{base_url}/v1/audio/transcriptions"))
            .bearer_auth(api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Recognition(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Recognition(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("invalid Whisper response: {e}")))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl SpeechRecognizer for SpeechToText {
    async fn recognize(&self, audio: &[u8]) -> Result<String> {
        let text = match &self.backend {
            Backend::Baidu { url, tokens } => self.transcribe_baidu(url, tokens, audio).await?,
            Backend::Whisper {
                base_url,
                api_key,
                model,
            } => {
                self.transcribe_whisper(base_url, api_key, model, audio)
                    .await?
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Recognition("empty transcript".to_string()));
        }
        Ok(text.to_string())
    }
}
