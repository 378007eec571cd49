use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Sent once by the platform when a subscription is created; must be echoed.
pub const VALIDATION_HEADER: &str = "validation-token";

/// Inbound platform callback. Either answers the validation handshake or
/// logs the event. Never rejects a payload.
pub async fn handle_webhook(headers: HeaderMap, body: Bytes) -> Response {
    if let Some(token) = headers
        .get(VALIDATION_HEADER)
        .filter(|v| !v.as_bytes().is_empty())
    {
        info!(token = ?token, "webhook validation token received");
        return (
            StatusCode::OK,
            [(HeaderName::from_static(VALIDATION_HEADER), token.clone())],
            "Validation token returned",
        )
            .into_response();
    }

    // Parse body as JSON; fall back to raw string
    let event: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into()));

    let delivery_id = Uuid::new_v4();
    info!(
        %delivery_id,
        event_type = event.get("event").and_then(|v| v.as_str()).unwrap_or(""),
        subscription_id = event.get("subscriptionId").and_then(|v| v.as_str()).unwrap_or(""),
        payload = %event,
        "webhook event received"
    );
    if let Some(parties) = event.pointer("/body/parties") {
        info!(%delivery_id, %parties, "telephony session parties");
    }

    (StatusCode::OK, "Event received").into_response()
}
