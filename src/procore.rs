//! Procore OAuth bridge.
//!
//! Two flows share one authorization-code exchange:
//! - browser flow: `/procore/login` redirects to the provider, the provider
//!   calls back on `/procore/callback`, and the resulting token is kept in the
//!   bridge session for `/procore/users`;
//! - direct flow: `/procore/auth` and `/procore` receive an auth code in the
//!   request body and exchange it themselves.

use crate::config::ProcoreConfig;
use crate::error::{required_str, AppError, JsonBody};
use crate::platform::{error_message, REQUEST_TIMEOUT};
use crate::types::TokenResponse;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const SCOPES: &[&str] = &["read", "write"];

#[derive(Debug, thiserror::Error)]
pub enum ProcoreError {
    #[error("{message} (HTTP {status})")]
    Http {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Procore URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Random value correlating an authorize redirect with its callback.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct ProcoreBridge {
    http: reqwest::Client,
    config: ProcoreConfig,
    /// Issued once per process.
    csrf_state: String,
    /// Last token obtained through either flow.
    session: RwLock<Option<TokenResponse>>,
}

impl ProcoreBridge {
    pub fn new(config: ProcoreConfig) -> Result<Self, ProcoreError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            csrf_state: generate_state(),
            session: RwLock::new(None),
        })
    }

    pub fn csrf_state(&self) -> &str {
        &self.csrf_state
    }

    pub fn authorize_url(&self) -> Result<String, ProcoreError> {
        let mut url = url::Url::parse(&format!("{}/oauth/authorize", self.config.login_url))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &self.csrf_state)
            .append_pair("scope", &SCOPES.join(" "));
        Ok(url.into())
    }

    /// Server-to-server authorization-code exchange.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ProcoreError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let resp = self
            .http
            .post(format!("{}/oauth/token", self.config.login_url))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProcoreError::Http {
                status,
                message: error_message(&body, status),
            });
        }
        let token: TokenResponse = resp.json().await?;
        info!(
            token_type = ?token.token_type,
            expires_in = ?token.expires_in,
            created_at = ?token.created_at,
            "Procore token obtained"
        );
        Ok(token)
    }

    pub async fn remember(&self, token: TokenResponse) {
        *self.session.write().await = Some(token);
    }

    pub async fn session_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    async fn send(&self, req: RequestBuilder, token: &str) -> Result<Value, ProcoreError> {
        let resp = req
            .bearer_auth(token)
            .header("Procore-Company-Id", &self.config.company_id)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(ProcoreError::Http {
                status,
                message: error_message(&String::from_utf8_lossy(&bytes), status),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }

    fn notes_url(&self) -> String {
        format!(
            "{}/rest/v1.0/projects/{}/notes",
            self.config.api_url, self.config.project_id
        )
    }

    pub async fn list_users(&self, token: &str) -> Result<Value, ProcoreError> {
        let url = format!(
            "{}/rest/v1.0/companies/{}/users",
            self.config.api_url, self.config.company_id
        );
        self.send(self.http.get(url), token).await
    }

    pub async fn create_note(
        &self,
        token: &str,
        user_id: &Value,
        content: &str,
    ) -> Result<Value, ProcoreError> {
        let body = json!({ "note": { "comment": content, "user_id": user_id } });
        self.send(self.http.post(self.notes_url()).json(&body), token)
            .await
    }

    pub async fn edit_note(
        &self,
        token: &str,
        note_id: &str,
        content: &str,
    ) -> Result<Value, ProcoreError> {
        let body = json!({ "note": { "comment": content } });
        let url = format!("{}/{note_id}", self.notes_url());
        self.send(self.http.patch(url).json(&body), token).await
    }
}

// ─── Routes ──────────────────────────────────────────────────────────────────

pub fn routes<S>(bridge: Arc<ProcoreBridge>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/procore/login", get(login))
        .route("/procore/callback", get(callback))
        .route("/procore/users", get(users))
        .route("/procore/auth", post(auth))
        .route("/procore", post(run_flow))
        .with_state(bridge)
}

fn upstream(step: &str, e: ProcoreError) -> AppError {
    warn!(step, error = %e, "Procore request failed");
    AppError::Upstream(format!("Procore {step} failed: {e}"))
}

async fn login(State(bridge): State<Arc<ProcoreBridge>>) -> Result<Response, AppError> {
    let url = bridge
        .authorize_url()
        .map_err(|e| upstream("authorize", e))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

async fn callback(
    State(bridge): State<Arc<ProcoreBridge>>,
    Query(params): Query<CallbackParams>,
) -> Result<&'static str, AppError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing required query parameter: code".into()))?;

    match params.state.as_deref() {
        Some(state) if state != bridge.csrf_state() => {
            warn!("Procore callback state mismatch");
            return Err(AppError::BadRequest("state mismatch".into()));
        }
        Some(_) => {}
        None => warn!("Procore callback without state parameter"),
    }

    let token = bridge
        .exchange_code(&code)
        .await
        .map_err(|e| upstream("token exchange", e))?;
    bridge.remember(token).await;
    Ok("Procore authorization successful. You can close this window.")
}

fn bearer_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn users(
    State(bridge): State<Arc<ProcoreBridge>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = match bearer_from(&headers) {
        Some(t) => t,
        None => bridge.session_token().await.ok_or_else(|| {
            AppError::Unauthorized("no Procore access token; authorize via /procore/login".into())
        })?,
    };
    let users = bridge
        .list_users(&token)
        .await
        .map_err(|e| upstream("user list", e))?;
    Ok(Json(users))
}

async fn auth(
    State(bridge): State<Arc<ProcoreBridge>>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, AppError> {
    let code = required_str(&body, "authCode")?;
    let token = bridge
        .exchange_code(code)
        .await
        .map_err(|e| upstream("token exchange", e))?;
    let access_token = token.access_token.clone();
    bridge.remember(token).await;
    Ok(Json(json!({ "accessToken": access_token })))
}

/// Scalar id from a JSON body field, as a path-safe string.
fn id_field(body: &Value, name: &str) -> Result<Option<String>, AppError> {
    match body.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()) => {
            Ok(Some(s.clone()))
        }
        Some(_) => Err(AppError::BadRequest(format!("invalid {name}"))),
    }
}

/// exchange → list users → add note → optionally edit a note. The first
/// failing step aborts the chain.
async fn run_flow(
    State(bridge): State<Arc<ProcoreBridge>>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, AppError> {
    let code = required_str(&body, "authCode")?;
    let user_id = match body.get("userId") {
        Some(v @ (Value::String(_) | Value::Number(_))) => v.clone(),
        _ => return Err(AppError::missing_field("userId")),
    };
    let content = required_str(&body, "noteContent")?;
    let note_id = id_field(&body, "noteId")?;

    let token = bridge
        .exchange_code(code)
        .await
        .map_err(|e| upstream("token exchange", e))?;
    let access = token.access_token.clone();
    bridge.remember(token).await;

    let users = bridge
        .list_users(&access)
        .await
        .map_err(|e| upstream("user list", e))?;
    let added = bridge
        .create_note(&access, &user_id, content)
        .await
        .map_err(|e| upstream("note creation", e))?;

    let mut result = json!({ "users": users, "addedNote": added });
    if let Some(note_id) = note_id {
        let edited = bridge
            .edit_note(&access, &note_id, content)
            .await
            .map_err(|e| upstream("note edit", e))?;
        result["editedNote"] = edited;
    }
    Ok(Json(result))
}
