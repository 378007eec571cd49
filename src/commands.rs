use crate::error::{required_str, AppError, JsonBody};
use crate::http_server::AppState;
use crate::platform::PlatformError;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{info, warn};

const SMS_PATH: &str = "/restapi/v1.0/account/~/extension/~/sms";
const RINGOUT_PATH: &str = "/restapi/v1.0/account/~/extension/~/ringout";
const SESSIONS_PATH: &str = "/restapi/v1.0/account/~/telephony/sessions";

fn upstream_error(action: &str, e: PlatformError) -> AppError {
    warn!(action, error = %e, "platform command failed");
    let message = format!("{action} failed: {e}");
    match e {
        PlatformError::NotAuthenticated => AppError::Unavailable(message),
        _ => AppError::Upstream(message),
    }
}

/// Session ids are interpolated into the request path.
fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!'))
}

pub async fn send_sms(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, AppError> {
    let to_number = required_str(&body, "toNumber")?;
    let message = required_str(&body, "message")?;

    let request = json!({
        "from": { "phoneNumber": state.platform.config().from_number },
        "to": [{ "phoneNumber": to_number }],
        "text": message,
    });
    let resp = state
        .platform
        .post(SMS_PATH, &request)
        .await
        .map_err(|e| upstream_error("SMS", e))?;

    info!(to = to_number, message_id = ?resp.get("id"), "SMS sent");
    Ok(Json(resp))
}

pub async fn make_call(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, AppError> {
    let to_number = required_str(&body, "toNumber")?;

    let request = json!({
        "from": { "phoneNumber": state.platform.config().from_number },
        "to": { "phoneNumber": to_number },
        "playPrompt": true,
    });
    let call_info = state
        .platform
        .post(RINGOUT_PATH, &request)
        .await
        .map_err(|e| upstream_error("Call", e))?;

    info!(
        to = to_number,
        session_id = ?call_info.get("id"),
        "call initiated"
    );
    Ok(Json(call_info))
}

pub async fn end_call(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, AppError> {
    let session_id = required_str(&body, "sessionId")?;
    if !valid_session_id(session_id) {
        return Err(AppError::BadRequest(format!("invalid sessionId: {session_id}")));
    }

    let resp = state
        .platform
        .post(
            &format!("{SESSIONS_PATH}/{session_id}"),
            &json!({ "action": "cancel" }),
        )
        .await
        .map_err(|e| upstream_error("Ending the call", e))?;

    info!(session_id, "call ended");
    Ok(Json(resp))
}
