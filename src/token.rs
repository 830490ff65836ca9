use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::OAuthConfig;

const DEFAULT_EXPIRES_IN: u64 = 300;
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct TokenError {
    pub message: String,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TokenError {}

impl From<String> for TokenError {
    fn from(s: String) -> Self {
        TokenError { message: s }
    }
}

impl From<&str> for TokenError {
    fn from(s: &str) -> Self {
        TokenError {
            message: s.to_string(),
        }
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, TokenError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials provider. Tokens are reused until shortly
/// before they expire.
pub struct OAuthTokenProvider {
    client: reqwest::Client,
    config: OAuthConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenProvider {
    pub fn new(config: OAuthConfig, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build token HTTP client: {e}"))?;
        Ok(Self {
            client,
            config,
            cached: Mutex::new(None),
        })
    }

    async fn request_token(&self) -> Result<CachedToken, TokenError> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TokenError::from(format!("Token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TokenError::from(format!(
                "Token endpoint returned status code {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TokenError::from(format!("Invalid token response: {e}")))?;

        let value = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::from("Failed to retrieve access token from token response"))?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));
        Ok(CachedToken {
            value,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SKEW),
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let token = self.request_token().await?;
        tracing::debug!("Fetched new access token");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
