//! Local stand-in for the telephony platform and Procore, bound on
//! 127.0.0.1:0. Every request is recorded so tests can assert on the exact
//! upstream traffic a handler produced.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::config::{PlatformConfig, ProcoreConfig};
use crate::fanout::Hub;
use crate::http_server::AppState;
use crate::platform::PlatformClient;
use crate::procore::ProcoreBridge;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Default)]
struct UpstreamState {
    calls: Vec<RecordedCall>,
    subscriptions: Vec<Value>,
    issued_tokens: u32,
    token_ttl: Option<i64>,
}

type Shared = Arc<Mutex<UpstreamState>>;

pub struct FakeUpstream {
    pub base_url: String,
    state: Shared,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        Self::with_subscriptions(&[]).await
    }

    /// Start with the given subscription ids already registered.
    pub async fn with_subscriptions(ids: &[&str]) -> Self {
        let state: Shared = Arc::new(Mutex::new(UpstreamState {
            subscriptions: ids
                .iter()
                .map(|id| {
                    json!({
                        "id": id,
                        "status": "Active",
                        "eventFilters": ["/restapi/v1.0/account/~/telephony/sessions"],
                        "deliveryMode": { "transportType": "WebHook", "address": "https://old.example/webhook" },
                        "expiresIn": 500
                    })
                })
                .collect(),
            ..Default::default()
        }));

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    /// Lifetime of tokens issued from now on.
    pub fn set_token_ttl(&self, secs: i64) {
        self.state.lock().unwrap().token_ttl = Some(secs);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, method: &str, path_prefix: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path.starts_with(path_prefix))
            .collect()
    }

    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            server_url: self.base_url.clone(),
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            jwt: "good-jwt".into(),
            webhook_address: "https://relay.example/webhook".into(),
            from_number: "+15550000000".into(),
        }
    }

    pub fn procore_config(&self) -> ProcoreConfig {
        ProcoreConfig {
            client_id: "pc-client".into(),
            client_secret: "pc-secret".into(),
            redirect_uri: "http://localhost:5000/procore/callback".into(),
            company_id: "10".into(),
            project_id: "20".into(),
            login_url: self.base_url.clone(),
            api_url: self.base_url.clone(),
        }
    }
}

/// App state logged in against `upstream`, Procore bridge disabled.
pub async fn test_state(upstream: &FakeUpstream) -> AppState {
    let platform = Arc::new(PlatformClient::new(upstream.platform_config()).unwrap());
    platform.login().await.unwrap();
    AppState {
        platform,
        hub: Arc::new(Hub::new(8)),
        procore: None,
    }
}

/// Same as [`test_state`] with the Procore bridge pointed at `upstream`.
pub async fn test_state_with_procore(upstream: &FakeUpstream) -> AppState {
    let mut state = test_state(upstream).await;
    state.procore = Some(Arc::new(
        ProcoreBridge::new(upstream.procore_config()).unwrap(),
    ));
    state
}

fn parse_body(headers: &HeaderMap, body: &Bytes) -> Value {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        let map: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Value::Object(map);
    }
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = parse_body(&headers, &body);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut st = state.lock().unwrap();
    st.calls.push(RecordedCall {
        method: method.to_string(),
        path: uri.path().to_string(),
        authorization: authorization.clone(),
        headers: headers.clone(),
        body: body.clone(),
    });

    let segments: Vec<&str> = uri.path().trim_start_matches('/').split('/').collect();
    let has_bearer = authorization
        .as_deref()
        .is_some_and(|a| a.starts_with("Bearer "));

    match (method.as_str(), segments.as_slice()) {
        // ── telephony platform ──
        ("POST", ["restapi", "oauth", "token"]) => {
            let grant = body["grant_type"].as_str().unwrap_or("");
            if body["assertion"] == "bad-jwt" || body["refresh_token"] == "bad-refresh" {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "invalid_grant", "error_description": "Invalid JWT token" }),
                );
            }
            if grant.is_empty() {
                return error(StatusCode::BAD_REQUEST, json!({ "error": "unsupported_grant_type" }));
            }
            st.issued_tokens += 1;
            let n = st.issued_tokens;
            Json(json!({
                "access_token": format!("tok-{n}"),
                "refresh_token": format!("ref-{n}"),
                "expires_in": st.token_ttl.unwrap_or(3600),
                "token_type": "bearer"
            }))
            .into_response()
        }
        (_, ["restapi", "v1.0", ..]) if !has_bearer => error(
            StatusCode::UNAUTHORIZED,
            json!({ "errorCode": "AGW-401", "message": "Authorization header is not specified" }),
        ),
        ("GET", ["restapi", "v1.0", "subscription"]) => {
            Json(json!({ "records": st.subscriptions })).into_response()
        }
        ("POST", ["restapi", "v1.0", "subscription"]) => {
            let mut created = body.clone();
            created["id"] = json!("sub-new");
            created["status"] = json!("Active");
            Json(created).into_response()
        }
        ("DELETE", ["restapi", "v1.0", "subscription", id]) => {
            if *id == "sub-stuck" {
                return error(
                    StatusCode::NOT_FOUND,
                    json!({ "errorCode": "SUB-404", "message": "Resource for parameter [subscriptionId] is not found" }),
                );
            }
            StatusCode::NO_CONTENT.into_response()
        }
        ("POST", ["restapi", "v1.0", "account", "~", "extension", "~", "sms"]) => Json(json!({
            "id": 1001,
            "type": "SMS",
            "direction": "Outbound",
            "messageStatus": "Queued",
            "from": body["from"],
            "to": body["to"],
            "subject": body["text"]
        }))
        .into_response(),
        ("POST", ["restapi", "v1.0", "account", "~", "extension", "~", "ringout"]) => {
            if body["to"]["phoneNumber"] == "+10000000000" {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "errorCode": "CMN-101", "message": "Parameter [to.phoneNumber] value is invalid" }),
                );
            }
            Json(json!({
                "id": "ring-1",
                "status": { "callStatus": "InProgress", "callerStatus": "InProgress", "calleeStatus": "InProgress" }
            }))
            .into_response()
        }
        ("POST", ["restapi", "v1.0", "account", "~", "telephony", "sessions", id]) => {
            if *id == "gone" {
                return error(
                    StatusCode::NOT_FOUND,
                    json!({ "errorCode": "TAS-104", "message": "Session not found" }),
                );
            }
            Json(json!({ "id": id, "action": body["action"], "status": "Cancelled" }))
                .into_response()
        }

        // ── Procore ──
        ("POST", ["oauth", "token"]) => {
            if body["code"] == "bad-code" {
                return error(
                    StatusCode::UNAUTHORIZED,
                    json!({ "error": "invalid_grant", "error_description": "The provided authorization grant is invalid" }),
                );
            }
            Json(json!({
                "access_token": "pc-tok",
                "refresh_token": "pc-ref",
                "token_type": "Bearer",
                "expires_in": 5400,
                "created_at": 1_700_000_000
            }))
            .into_response()
        }
        (_, ["rest", ..]) if !has_bearer => {
            error(StatusCode::UNAUTHORIZED, json!({ "errors": "unauthorized" }))
        }
        ("GET", ["rest", "v1.0", "companies", _, "users"]) => Json(json!([
            { "id": 1, "name": "Ada Lovelace" },
            { "id": 2, "name": "Grace Hopper" }
        ]))
        .into_response(),
        ("POST", ["rest", "v1.0", "projects", _, "notes"]) => Json(json!({
            "id": 77,
            "comment": body["note"]["comment"],
            "user_id": body["note"]["user_id"]
        }))
        .into_response(),
        ("PATCH", ["rest", "v1.0", "projects", _, "notes", id]) => {
            if *id == "404" {
                return error(StatusCode::NOT_FOUND, json!({ "errors": "Note not found" }));
            }
            Json(json!({ "id": id, "comment": body["note"]["comment"] })).into_response()
        }

        _ => error(StatusCode::NOT_FOUND, json!({ "message": "no such route" })),
    }
}
