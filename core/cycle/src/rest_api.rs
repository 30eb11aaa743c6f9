//! REST endpoints: the gateway webhook sink and the admin control surface.
//!
//! Responsibility of these handlers is mapping between HTTP and service
//! calls; no orchestration logic is allowed here.

use actix_web::web::Data;
use actix_web::Scope;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::model::{CycleFrequency, Group, GroupStatus, PauseReason};
use crate::service::CycleService;

pub(crate) mod admin;
mod error;
pub(crate) mod gateway;

/// Shared secret the gateway signs callback bodies with.
#[derive(Clone)]
pub struct WebhookSecret(pub Vec<u8>);

pub fn admin_scope(service: Arc<CycleService>) -> Scope {
    actix_web::web::scope("/admin-api/v1")
        .app_data(Data::new(service))
        .service(admin::start_cycle)
        .service(admin::pause_group)
        .service(admin::retry_group)
        .service(admin::get_group)
        .service(admin::list_groups)
        .service(admin::list_payments)
        .service(admin::list_payouts)
        .service(admin::group_log)
        .service(admin::queue_stats)
        .service(admin::replay_webhook)
}

pub fn gateway_scope(service: Arc<CycleService>, secret: WebhookSecret) -> Scope {
    actix_web::web::scope("/gateway-api/v1")
        .app_data(Data::new(service))
        .app_data(Data::new(secret))
        .service(gateway::post_event)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> ErrorMessage {
        ErrorMessage {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: &str) -> ErrorMessage {
        ErrorMessage {
            message: message.into(),
            kind: Some(kind.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct PathGroup {
    pub group_id: String,
}

#[derive(Deserialize)]
pub struct PathEvent {
    pub event_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartCycleRequest {
    pub first_cycle_date: NaiveDate,
    pub cycle_frequency: CycleFrequency,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    pub reason: Option<PauseReason>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub contribution_amount: String,
    pub total_debited: String,
    pub total_pending: String,
    pub total_success: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GroupStateResponse {
    pub group_id: String,
    pub name: String,
    pub status: GroupStatus,
    pub pause_reason: Option<PauseReason>,
    pub cycle_started: bool,
    pub cycle_frequency: CycleFrequency,
    pub next_cycle_date: Option<NaiveDateTime>,
    pub future_cycles: Vec<NaiveDate>,
    pub aggregates: Aggregates,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: String,
    pub member_id: String,
    pub cycle_number: i32,
    pub amount: String,
    pub status: crate::db::model::PaymentStatus,
    pub retry_count: i32,
    pub gateway_intent_id: Option<String>,
}

impl From<crate::db::model::Payment> for PaymentResponse {
    fn from(payment: crate::db::model::Payment) -> Self {
        PaymentResponse {
            payment_id: payment.id,
            member_id: payment.member_id,
            cycle_number: payment.cycle_number,
            amount: payment.amount.to_string(),
            status: payment.status,
            retry_count: payment.retry_count,
            gateway_intent_id: payment.gateway_intent_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub payout_id: String,
    pub member_id: String,
    pub cycle_number: i32,
    pub amount: String,
    pub status: crate::db::model::PayoutStatus,
    pub gateway_transfer_id: Option<String>,
}

impl From<crate::db::model::Payout> for PayoutResponse {
    fn from(payout: crate::db::model::Payout) -> Self {
        PayoutResponse {
            payout_id: payout.id,
            member_id: payout.member_id,
            cycle_number: payout.cycle_number,
            amount: payout.amount.to_string(),
            status: payout.status,
            gateway_transfer_id: payout.gateway_transfer_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryResponse {
    pub severity: String,
    pub cycle_number: Option<i32>,
    pub message: String,
    pub created_ts: NaiveDateTime,
}

impl From<crate::db::model::JobLogEntry> for LogEntryResponse {
    fn from(entry: crate::db::model::JobLogEntry) -> Self {
        LogEntryResponse {
            severity: entry.severity.to_string(),
            cycle_number: entry.cycle_number,
            message: entry.message,
            created_ts: entry.created_ts,
        }
    }
}

#[derive(Deserialize)]
pub struct QueryLimit {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

#[inline(always)]
fn default_log_limit() -> i64 {
    50
}

impl From<Group> for GroupStateResponse {
    fn from(group: Group) -> Self {
        let future_cycles = group.future_cycle_dates();
        GroupStateResponse {
            group_id: group.id,
            name: group.name,
            status: group.status,
            pause_reason: group.pause_reason,
            cycle_started: group.cycle_started,
            cycle_frequency: group.cycle_frequency,
            next_cycle_date: group.next_cycle_date,
            future_cycles,
            aggregates: Aggregates {
                contribution_amount: group.contribution_amount.to_string(),
                total_debited: group.total_debited.to_string(),
                total_pending: group.total_pending.to_string(),
                total_success: group.total_success.to_string(),
            },
        }
    }
}
