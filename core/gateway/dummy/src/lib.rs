//! Scriptable in-process gateway driver.
//!
//! Defaults to accepting every debit. Tests script per-account outcomes and
//! then ask the driver to emit the signed callback envelopes a real provider
//! would deliver.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;

use tanda_gateway::signature;
use tanda_gateway::{
    DebitSpec, EventKind, GatewayDriver, GatewayError, GatewayEvent, IntentId, IntentState,
    IntentStatus,
};

#[derive(Clone, Debug)]
pub enum Outcome {
    Accept,
    RefusePermanent(String),
    FailTransient(String),
}

#[derive(Clone, Debug)]
pub struct RecordedIntent {
    pub spec: DebitSpec,
    pub status: IntentStatus,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, VecDeque<Outcome>>,
    intents: HashMap<IntentId, RecordedIntent>,
    by_idempotency_key: HashMap<String, IntentId>,
    intent_seq: u64,
    event_seq: u64,
}

pub struct DummyGateway {
    secret: Vec<u8>,
    inner: Mutex<Inner>,
}

impl DummyGateway {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        DummyGateway {
            secret: secret.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue an outcome for the next `create_debit_intent` call hitting
    /// `debtor_account`. Unscripted calls are accepted.
    pub fn script(&self, debtor_account: &str, outcome: Outcome) {
        self.inner
            .lock()
            .scripts
            .entry(debtor_account.to_string())
            .or_insert_with(VecDeque::new)
            .push_back(outcome);
    }

    pub fn intent(&self, intent_id: &str) -> Option<RecordedIntent> {
        self.inner.lock().intents.get(intent_id).cloned()
    }

    pub fn intent_count(&self) -> usize {
        self.inner.lock().intents.len()
    }

    /// Latest intent created for the given debtor account.
    pub fn intent_for_account(&self, debtor_account: &str) -> Option<(IntentId, RecordedIntent)> {
        let inner = self.inner.lock();
        inner
            .intents
            .iter()
            .filter(|(_, rec)| rec.spec.debtor_account == debtor_account)
            .max_by_key(|(id, _)| id.to_string())
            .map(|(id, rec)| (id.clone(), rec.clone()))
    }

    /// Resolve an intent as succeeded and produce the callback envelope.
    pub fn succeed_intent(&self, intent_id: &str) -> GatewayEvent {
        let mut inner = self.inner.lock();
        if let Some(rec) = inner.intents.get_mut(intent_id) {
            rec.status = IntentStatus::Succeeded;
        }
        Self::event(&mut inner, EventKind::IntentSucceeded, Some(intent_id), None)
    }

    /// Like `succeed_intent`, with the outbound transfer id the provider
    /// attaches when this debit settles the payee transfer.
    pub fn succeed_intent_with_transfer(&self, intent_id: &str, transfer_id: &str) -> GatewayEvent {
        let mut event = self.succeed_intent(intent_id);
        event.transfer_id = Some(transfer_id.to_string());
        event
    }

    /// Resolve an intent as failed and produce the callback envelope.
    pub fn fail_intent(&self, intent_id: &str, reason: &str) -> GatewayEvent {
        let mut inner = self.inner.lock();
        if let Some(rec) = inner.intents.get_mut(intent_id) {
            rec.status = IntentStatus::Failed;
        }
        let mut event = Self::event(&mut inner, EventKind::IntentFailed, Some(intent_id), None);
        event.reason = Some(reason.to_string());
        event
    }

    pub fn reverse_transfer(&self, transfer_id: &str) -> GatewayEvent {
        let mut inner = self.inner.lock();
        Self::event(
            &mut inner,
            EventKind::TransferReversed,
            None,
            Some(transfer_id),
        )
    }

    pub fn suspend_account(&self, account_id: &str) -> GatewayEvent {
        let mut inner = self.inner.lock();
        let mut event = Self::event(&mut inner, EventKind::AccountSuspended, None, None);
        event.account_id = Some(account_id.to_string());
        event
    }

    /// Serialize an envelope the way the provider posts it: raw JSON body
    /// plus the hex HMAC signature header value.
    pub fn signed_body(&self, event: &GatewayEvent) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(event).expect("gateway event serializes");
        let sig = signature::sign(&self.secret, &body);
        (body, sig)
    }

    fn event(
        inner: &mut Inner,
        kind: EventKind,
        intent_id: Option<&str>,
        transfer_id: Option<&str>,
    ) -> GatewayEvent {
        inner.event_seq += 1;
        GatewayEvent {
            event_id: format!("evt_{:08}", inner.event_seq),
            kind,
            intent_id: intent_id.map(str::to_string),
            transfer_id: transfer_id.map(str::to_string),
            account_id: None,
            reason: None,
            created_at: Utc::now(),
        }
    }
}

impl GatewayDriver for DummyGateway {
    fn name(&self) -> &str {
        "dummy"
    }

    fn create_debit_intent(&self, spec: &DebitSpec) -> Result<IntentId, GatewayError> {
        let mut inner = self.inner.lock();

        // Providers collapse duplicate submissions on the idempotency key.
        if let Some(existing) = inner.by_idempotency_key.get(&spec.idempotency_key) {
            return Ok(existing.clone());
        }

        let outcome = inner
            .scripts
            .get_mut(&spec.debtor_account)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Accept => {
                inner.intent_seq += 1;
                let intent_id = format!("dummy-pi-{:08}", inner.intent_seq);
                inner.intents.insert(
                    intent_id.clone(),
                    RecordedIntent {
                        spec: spec.clone(),
                        status: IntentStatus::Processing,
                    },
                );
                inner
                    .by_idempotency_key
                    .insert(spec.idempotency_key.clone(), intent_id.clone());
                Ok(intent_id)
            }
            Outcome::RefusePermanent(reason) => Err(GatewayError::Permanent(reason)),
            Outcome::FailTransient(reason) => Err(GatewayError::Transient(reason)),
        }
    }

    fn get_intent(&self, intent_id: &str) -> Result<IntentState, GatewayError> {
        let inner = self.inner.lock();
        let rec = inner
            .intents
            .get(intent_id)
            .ok_or_else(|| GatewayError::Permanent(format!("No such intent: {}", intent_id)))?;
        Ok(IntentState {
            intent_id: intent_id.to_string(),
            status: rec.status,
            amount_cents: rec.spec.amount_cents,
            metadata: rec.spec.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(account: &str, key: &str) -> DebitSpec {
        DebitSpec {
            debtor_account: account.to_string(),
            mandate: format!("mandate-{}", account),
            amount_cents: 10_000,
            transfer_to: "acct_payee".to_string(),
            application_fee_cents: 130,
            idempotency_key: key.to_string(),
            metadata: serde_json::json!({ "test": true }),
        }
    }

    #[test]
    fn accepts_by_default() {
        let gw = DummyGateway::new("secret");
        let id = gw.create_debit_intent(&spec("acct_1", "k1")).unwrap();
        assert_eq!(gw.intent(&id).unwrap().status, IntentStatus::Processing);
    }

    #[test]
    fn duplicate_idempotency_key_returns_same_intent() {
        let gw = DummyGateway::new("secret");
        let a = gw.create_debit_intent(&spec("acct_1", "k1")).unwrap();
        let b = gw.create_debit_intent(&spec("acct_1", "k1")).unwrap();
        assert_eq!(a, b);
        assert_eq!(gw.intent_count(), 1);
    }

    #[test]
    fn scripted_outcomes_apply_in_order() {
        let gw = DummyGateway::new("secret");
        gw.script("acct_1", Outcome::FailTransient("timeout".into()));
        gw.script("acct_1", Outcome::Accept);

        let first = gw.create_debit_intent(&spec("acct_1", "k1"));
        assert!(matches!(first, Err(GatewayError::Transient(_))));

        let second = gw.create_debit_intent(&spec("acct_1", "k2"));
        assert!(second.is_ok());
    }

    #[test]
    fn emitted_events_verify_against_secret() {
        let gw = DummyGateway::new("secret");
        let id = gw.create_debit_intent(&spec("acct_1", "k1")).unwrap();
        let event = gw.succeed_intent(&id);
        let (body, sig) = gw.signed_body(&event);
        assert!(signature::verify(b"secret", &body, &sig).is_ok());
        assert_eq!(gw.intent(&id).unwrap().status, IntentStatus::Succeeded);
    }
}
