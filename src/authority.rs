//! Client for the external identity authority (MOSIP "get UIN" API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::StatusCode;
use serde_json::Value;

const MAX_BODY_DETAIL: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityError {
    /// The request never produced a response.
    Transport(String),
    Status { code: u16, body: String },
    InvalidBody(String),
    MissingIdentifier(String),
}

impl std::fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityError::Transport(msg) => write!(f, "Authority request failed: {msg}"),
            AuthorityError::Status { code, body } => {
                write!(f, "Authority call failed with status code {code}: {body}")
            }
            AuthorityError::InvalidBody(msg) => write!(f, "Authority returned invalid JSON: {msg}"),
            AuthorityError::MissingIdentifier(detail) => {
                write!(f, "UIN not received from authority: {detail}")
            }
        }
    }
}

impl std::error::Error for AuthorityError {}

#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Ask the authority for a fresh identifier. Performs exactly one call.
    async fn fetch_identifier(&self, token: &str) -> Result<String, AuthorityError>;
}

pub struct MosipAuthorityClient {
    client: reqwest::Client,
    url: String,
}

impl MosipAuthorityClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build authority HTTP client: {e}"))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IdentityAuthority for MosipAuthorityClient {
    async fn fetch_identifier(&self, token: &str) -> Result<String, AuthorityError> {
        let resp = self
            .client
            .get(&self.url)
            .header(COOKIE, format!("Authorization={token}"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthorityError::Transport(format!("reading body: {e}")))?;

        if status != StatusCode::OK {
            return Err(AuthorityError::Status {
                code: status.as_u16(),
                body: truncate(&body),
            });
        }

        let uin = extract_uin(&body)?;
        tracing::debug!("Authority issued UIN {uin}");
        Ok(uin)
    }
}

/// Pull `response.uin` out of an authority response body.
pub fn extract_uin(body: &str) -> Result<String, AuthorityError> {
    let data: Value =
        serde_json::from_str(body).map_err(|e| AuthorityError::InvalidBody(e.to_string()))?;

    match data.pointer("/response/uin") {
        Some(Value::String(uin)) if !uin.trim().is_empty() => Ok(uin.trim().to_string()),
        Some(Value::Number(uin)) => Ok(uin.to_string()),
        _ => {
            let detail = match data.get("errors") {
                Some(errors) if !errors.is_null() => format!("errors: {errors}"),
                _ => truncate(body),
            };
            Err(AuthorityError::MissingIdentifier(detail))
        }
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_BODY_DETAIL).collect()
}
