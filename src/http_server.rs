use crate::fanout::{self, Hub};
use crate::platform::PlatformClient;
use crate::procore::{self, ProcoreBridge};
use crate::reconcile;
use crate::types::Frame;
use crate::{commands, webhook};
use axum::{
    extract::{FromRequestParts, Request, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const BANNER: &str = "RingCentral API Integration with JWT Authentication";

/// Everything a handler may touch: the platform session, the WebSocket
/// registry and, when configured, the Procore bridge.
#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<PlatformClient>,
    pub hub: Arc<Hub>,
    pub procore: Option<Arc<ProcoreBridge>>,
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/ws", get(fanout::ws_handler))
        .route("/login", get(login))
        .route("/send-sms", post(commands::send_sms))
        .route("/make-call", post(commands::make_call))
        .route("/end-call", post(commands::end_call))
        .route("/webhook", post(webhook::handle_webhook))
        .route("/test-websocket", get(test_websocket));

    if let Some(bridge) = state.procore.clone() {
        app = app.merge(procore::routes::<AppState>(bridge));
    }

    app.with_state(state)
}

/// Bind `addr`, spawn the server, and return the bound port with the
/// server task.
pub async fn start(addr: &str, state: AppState) -> std::io::Result<(u16, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    info!(port, "HTTP server bound");

    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server error");
        }
    });

    Ok((port, handle))
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Banner for plain requests; WebSocket upgrades are accepted here too since
/// clients connect to the bare host.
async fn root(State(state): State<AppState>, req: Request) -> Response {
    if !wants_upgrade(req.headers()) {
        return BANNER.into_response();
    }
    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws
            .on_upgrade(move |socket| fanout::handle_socket(socket, state))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Log in again with the configured JWT and, on success, reconcile
/// subscriptions in the background.
async fn login(State(state): State<AppState>) -> Response {
    info!("login requested");
    match state.platform.login().await {
        Ok(()) => {
            let platform = state.platform.clone();
            tokio::spawn(async move {
                reconcile::run_once(&platform).await;
            });
            "Login successful with JWT!".into_response()
        }
        Err(e) => {
            warn!(error = %e, "login failed");
            (StatusCode::BAD_GATEWAY, format!("Login failed: {e}")).into_response()
        }
    }
}

async fn test_websocket(State(state): State<AppState>) -> &'static str {
    let delivered = state.hub.broadcast(&Frame::test()).await;
    info!(delivered, "test message broadcast");
    "Test message sent to WebSocket clients."
}
