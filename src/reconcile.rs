use crate::platform::{PlatformClient, PlatformError};
use crate::types::{CreateSubscription, DeliveryMode, SubscriptionList};
use tracing::{debug, error, info, warn};

pub const SUBSCRIPTION_PATH: &str = "/restapi/v1.0/subscription";

/// Presence (with detailed telephony state) and telephony session events.
pub const EVENT_FILTERS: [&str; 2] = [
    "/restapi/v1.0/account/~/extension/~/presence?detailedTelephonyState=true",
    "/restapi/v1.0/account/~/telephony/sessions",
];

pub const SUBSCRIPTION_TTL_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The registry was empty and one subscription was created.
    Created { id: String },
    /// The registry was populated and every entry was torn down.
    Cleared { deleted: usize, failed: usize },
}

pub fn subscription_request(delivery_address: &str) -> CreateSubscription {
    CreateSubscription {
        event_filters: EVENT_FILTERS.iter().map(|f| f.to_string()).collect(),
        delivery_mode: DeliveryMode {
            transport_type: "WebHook".to_string(),
            address: delivery_address.to_string(),
        },
        expires_in: SUBSCRIPTION_TTL_SECS,
    }
}

/// Create-if-empty, delete-all-if-not. The two branches never chain: a
/// populated registry ends this run with zero subscriptions and the next run
/// recreates one.
pub async fn reconcile(
    client: &PlatformClient,
    delivery_address: &str,
) -> Result<ReconcileOutcome, PlatformError> {
    let listed = client.get(SUBSCRIPTION_PATH).await?;
    let existing: SubscriptionList = serde_json::from_value(listed)?;
    info!(count = existing.records.len(), "listed webhook subscriptions");
    for record in &existing.records {
        debug!(
            subscription_id = %record.id,
            status = ?record.status,
            filters = ?record.event_filters,
            address = ?record.delivery_mode.as_ref().map(|m| &m.address),
            expires_in = ?record.expires_in,
            expiration_time = ?record.expiration_time,
            "existing subscription"
        );
    }

    if existing.records.is_empty() {
        info!("no subscription yet, creating one");
        let body = serde_json::to_value(subscription_request(delivery_address))?;
        let created = client.post(SUBSCRIPTION_PATH, &body).await?;
        let id = created
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        info!(subscription_id = %id, "subscription created, ready to receive webhooks");
        return Ok(ReconcileOutcome::Created { id });
    }

    let mut deleted = 0;
    let mut failed = 0;
    for record in &existing.records {
        match client
            .delete(&format!("{SUBSCRIPTION_PATH}/{}", record.id))
            .await
        {
            Ok(_) => {
                info!(subscription_id = %record.id, "subscription deleted");
                deleted += 1;
            }
            Err(e) => {
                warn!(subscription_id = %record.id, error = %e, "failed to delete subscription");
                failed += 1;
            }
        }
    }
    Ok(ReconcileOutcome::Cleared { deleted, failed })
}

/// Run once and log the result; failures never reach the caller.
pub async fn run_once(client: &PlatformClient) {
    let address = client.config().webhook_address.clone();
    match reconcile(client, &address).await {
        Ok(outcome) => info!(?outcome, "subscription reconciliation finished"),
        Err(e) => error!(error = %e, "subscription reconciliation failed"),
    }
}
