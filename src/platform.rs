use crate::config::PlatformConfig;
use crate::types::{AccessToken, TokenResponse};
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const TOKEN_PATH: &str = "/restapi/oauth/token";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh once the token has less than this many seconds left.
const REFRESH_MARGIN_SECS: i64 = 60;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("not logged in to the platform")]
    NotAuthenticated,
    #[error("{message} (HTTP {status})")]
    Http { status: StatusCode, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Session with the telephony platform: credentials, the current bearer
/// token, and the HTTP verbs used by the rest of the relay.
pub struct PlatformClient {
    http: reqwest::Client,
    config: PlatformConfig,
    token: RwLock<Option<AccessToken>>,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Exchange the configured JWT for an access token.
    pub async fn login(&self) -> Result<(), PlatformError> {
        let token = self
            .token_grant(&[("grant_type", JWT_GRANT), ("assertion", self.config.jwt.as_str())])
            .await?;
        info!(expires_at = %token.expires_at, "platform login succeeded");
        *self.token.write().await = Some(token);
        Ok(())
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<AccessToken, PlatformError> {
        let resp = self
            .http
            .post(format!("{}{TOKEN_PATH}", self.config.server_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::Auth(error_message(&body, status)));
        }

        let parsed: TokenResponse = resp.json().await?;
        Ok(AccessToken::from_response(parsed, Utc::now()))
    }

    /// Current access token, refreshed first if it is about to expire.
    async fn bearer(&self) -> Result<String, PlatformError> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or(PlatformError::NotAuthenticated)?;

        if !token.expires_within(Utc::now(), chrono::Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(token.access_token);
        }
        self.refresh(token.refresh_token.as_deref()).await
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> Result<String, PlatformError> {
        if let Some(rt) = refresh_token {
            match self
                .token_grant(&[("grant_type", "refresh_token"), ("refresh_token", rt)])
                .await
            {
                Ok(token) => {
                    debug!(expires_at = %token.expires_at, "platform token refreshed");
                    let access = token.access_token.clone();
                    *self.token.write().await = Some(token);
                    return Ok(access);
                }
                Err(e) => warn!(error = %e, "token refresh failed, logging in again"),
            }
        }

        self.login().await?;
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(PlatformError::NotAuthenticated)
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PlatformError> {
        let bearer = self.bearer().await?;
        debug!(%method, path, "platform request");

        let mut req = self
            .http
            .request(method, format!("{}{path}", self.config.server_url))
            .bearer_auth(bearer);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(PlatformError::Http {
                status,
                message: error_message(&text, status),
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }

    pub async fn get(&self, path: &str) -> Result<Value, PlatformError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, PlatformError> {
        self.request(Method::DELETE, path, None).await
    }

    #[cfg(test)]
    pub(crate) async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: AccessToken) {
        *self.token.write().await = Some(token);
    }
}

/// Best human-readable message from an upstream error body.
pub fn error_message(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "error_description", "errors", "error"]
            .iter()
            .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
    });
    match from_json {
        Some(msg) => msg,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => body.trim().to_string(),
    }
}
