use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ─── Telephony platform ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMode {
    pub transport_type: String,
    pub address: String,
}

/// A webhook subscription as the platform reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub event_filters: Vec<String>,
    #[serde(default)]
    pub delivery_mode: Option<DeliveryMode>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub records: Vec<Subscription>,
}

/// Body of `POST /restapi/v1.0/subscription`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscription {
    pub event_filters: Vec<String>,
    pub delivery_mode: DeliveryMode,
    pub expires_in: u64,
}

/// Token endpoint response shared by the platform and Procore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Platform bearer credential held by the client session.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Negative lifetimes count as already expired; lifetimes past the
    /// representable range saturate.
    pub fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let ttl = resp.expires_in.unwrap_or(3600).max(0);
        let expires_at = TimeDelta::try_seconds(ttl)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at,
        }
    }

    /// True when the token is expired or will be within `margin`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        self.expires_at
            .checked_sub_signed(margin)
            .map_or(true, |deadline| deadline <= now)
    }
}

// ─── Realtime ───────────────────────────────────────────────────────────────

/// The only frame shape the WebSocket endpoint emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub message: String,
}

impl Frame {
    pub fn welcome() -> Self {
        Self {
            message: "Welcome to the WebSocket server".to_string(),
        }
    }

    pub fn echo(text: &str) -> Self {
        Self {
            message: format!("Echo: {text}"),
        }
    }

    pub fn test() -> Self {
        Self {
            message: "This is a test message".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({ "message": self.message }).to_string()
    }
}
