//! OAuth client-credentials access token cache
//!
//! Baidu speech APIs authenticate every request with a short-lived access token
//! fetched from the OAuth endpoint. One cache is shared by every connection using
//! the same credentials.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Default OAuth token endpoint
pub const BAIDU_TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

/// Lifetime assumed when the endpoint omits `expires_in`
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Refresh this long before the reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Bound on the token fetch itself
const TOKEN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error_description: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Caches an access token until shortly before it expires
pub struct AccessTokenCache {
    client: reqwest::Client,
    token_url: String,
    client_id: SecretString,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenCache {
    /// Create a cache for the given client credentials
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: SecretString,
        client_secret: SecretString,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, fetching a new one when needed
    ///
    /// `map_err` converts a fetch failure into the caller's error kind so a token
    /// problem surfaces as a recognition or synthesis failure.
    ///
    /// # Errors
    ///
    /// Returns error if the token endpoint fails or omits the token
    pub async fn token(&self, map_err: fn(String) -> Error) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .get(&self.token_url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.expose_secret()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_err(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, "access token request rejected");
            return Err(map_err(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| map_err(format!("invalid token response: {e}")))?;

        let Some(value) = body.access_token else {
            let reason = body
                .error_description
                .unwrap_or_else(|| "missing access_token".to_string());
            return Err(map_err(reason));
        };

        match expiry(Instant::now(), body.expires_in) {
            Some(expires_at) => {
                tracing::debug!(expires_in = ?body.expires_in, "fetched access token");
                *cached = Some(CachedToken {
                    value: value.clone(),
                    expires_at,
                });
            }
            None => tracing::warn!("access token expiry out of range, not caching"),
        }

        Ok(value)
    }

    /// Drop the cached token so the next call fetches a fresh one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

/// When a token fetched at `now` should be refreshed
///
/// An `expires_in` too large to represent falls back to the default lifetime.
fn expiry(now: Instant, expires_in: Option<u64>) -> Option<Instant> {
    let ttl = expires_in.map_or(DEFAULT_TTL, Duration::from_secs);
    now.checked_add(ttl.saturating_sub(REFRESH_MARGIN))
        .or_else(|| now.checked_add(DEFAULT_TTL.saturating_sub(REFRESH_MARGIN)))
}
