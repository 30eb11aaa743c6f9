use crate::model::{IntentId, IntentState};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider refused the operation and retrying the same request
    /// cannot succeed (revoked mandate, closed account, bad request).
    #[error("Permanent gateway refusal: {0}")]
    Permanent(String),
    /// Network blip, provider 5xx or rate limit. Safe to retry.
    #[error("Transient gateway error: {0}")]
    Transient(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Everything needed to ask the provider for one debit. Amounts are integer
/// cents: the exact-decimal world ends at this boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebitSpec {
    pub debtor_account: String,
    pub mandate: String,
    pub amount_cents: i64,
    /// Destination account of the pooled funds (the payee).
    pub transfer_to: String,
    pub application_fee_cents: i64,
    /// Client-derived key; the provider collapses duplicate submissions.
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

/// Provider abstraction consumed by the cycle processors.
///
/// Calls are synchronous: processors invoke the driver from within a store
/// transaction, which already runs as a blocking closure. Implementations
/// doing network I/O should use a blocking client with sensible timeouts.
pub trait GatewayDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Register a debit intent with the provider. The outcome arrives later
    /// through a signed `intent_succeeded` / `intent_failed` callback.
    fn create_debit_intent(&self, spec: &DebitSpec) -> Result<IntentId, GatewayError>;

    fn get_intent(&self, intent_id: &str) -> Result<IntentState, GatewayError>;
}
