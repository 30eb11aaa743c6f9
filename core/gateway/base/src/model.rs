use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IntentId = String;
pub type TransferId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Processing,
    Succeeded,
    Failed,
}

/// Snapshot of a debit intent as reported by the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentState {
    pub intent_id: IntentId,
    pub status: IntentStatus,
    pub amount_cents: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Callback kinds the orchestrator recognizes. Providers keep inventing new
/// ones; anything we don't know maps to `Unknown` and is acknowledged
/// without effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IntentSucceeded,
    IntentFailed,
    TransferReversed,
    MandateConfirmed,
    AccountSuspended,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IntentSucceeded => "intent_succeeded",
            EventKind::IntentFailed => "intent_failed",
            EventKind::TransferReversed => "transfer_reversed",
            EventKind::MandateConfirmed => "mandate_confirmed",
            EventKind::AccountSuspended => "account_suspended",
            EventKind::Unknown => "unknown",
        }
    }
}

/// Signed event envelope delivered to the webhook endpoint. `event_id` is
/// assigned by the provider and is monotonic per account; delivery is
/// at-least-once, so consumers must converge under duplicates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    pub event_id: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<IntentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
