//! Reply generation through an `OpenAI`-compatible chat completion endpoint

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ReplyGenerator;
use crate::config::LlmConfig;
use crate::session::{Role, Turn};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generates assistant replies from a chat completion API
pub struct ChatCompletions {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
}

impl ChatCompletions {
    /// Build the generator described by the LLM configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("LLM API key required".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// System prompt, prior turns, then the new user text
    fn build_messages<'a>(&'a self, text: &'a str, history: &'a [Turn]) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.text,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: text,
        });
        messages
    }
}

#[async_trait]
impl ReplyGenerator for ChatCompletions {
    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.build_messages(text, history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        tracing::debug!(messages = request.messages.len(), model = %self.model, "sending chat request");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::Generation(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Generation(format!("chat API error {status}: {body}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid chat response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Generation("no reply in response".to_string()))
    }
}
