use chrono::{NaiveDateTime, Utc};

use crate::db::schema::webhook_event;

/// Raw envelope of every accepted callback, kept for audit and operator
/// replay. Idempotency of ingestion is guarded by entity status checks, not
/// by this table.
#[derive(Clone, Debug, Identifiable, Insertable, Queryable)]
#[table_name = "webhook_event"]
pub struct WebhookEventRow {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub received_ts: NaiveDateTime,
    pub applied: bool,
}

impl WebhookEventRow {
    pub fn new(event_id: &str, kind: &str, payload: &str) -> WebhookEventRow {
        WebhookEventRow {
            id: event_id.to_string(),
            kind: kind.to_string(),
            payload: payload.to_string(),
            received_ts: Utc::now().naive_utc(),
            applied: false,
        }
    }
}
