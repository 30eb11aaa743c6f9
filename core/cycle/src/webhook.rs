//! Ingestion of signed gateway callbacks: one idempotent state transition
//! per event kind. Convergence under duplicate and reordered delivery comes
//! from entity status guards, never from event-id dedup; the stored
//! envelope exists for audit and replay only.
//!
//! The last `intent_succeeded` of a cycle finalizes it: payout row, payee
//! marked paid and the schedule advanced, all in the same transaction as
//! the payment flip. Money moves outward only after it has moved inward.

use bigdecimal::BigDecimal;
use chrono::Utc;

use tanda_gateway::{EventKind, GatewayEvent};
use tanda_persistence::{ConnType, DbExecutor};

use crate::config::{to_chrono, CycleConfig, QueueConfig};
use crate::db::dao::{self, GroupDaoError, PaymentDaoError, PayoutCreateOutcome, PayoutDaoError};
use crate::db::model::{
    JobKind, NewJobLogEntry, PauseReason, PaymentStatus, Payout, PayoutStatus, ScheduledJob,
    Severity, WebhookEventRow,
};
use crate::db::DbError;
use crate::notifier::Notification;
use crate::scheduler::{self, AdvanceOutcome, SchedulerError};

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Stored state contradicts itself (missing group, missing payee).
    /// Rolled back and surfaced; an operator has to look.
    #[error("Inconsistent state while applying event [{event_id}]: {message}")]
    Inconsistent { event_id: String, message: String },
    #[error("Stored event [{0}] is unreadable: {1}")]
    BadStoredEvent(String, serde_json::Error),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error(transparent)]
    Group(#[from] GroupDaoError),
    #[error(transparent)]
    Payment(#[from] PaymentDaoError),
    #[error(transparent)]
    Payout(#[from] PayoutDaoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("Database error: {0}")]
    Db(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for IngestError {
    fn from(err: ErrorType) -> Self {
        IngestError::Db(err.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FinalizeError {
    #[error("Inconsistent state for group [{group_id}] cycle {cycle_number}: {message}")]
    Inconsistent {
        group_id: String,
        cycle_number: i32,
        message: String,
    },
    #[error(transparent)]
    Group(#[from] GroupDaoError),
    #[error(transparent)]
    Payout(#[from] PayoutDaoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("Database error: {0}")]
    Db(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for FinalizeError {
    fn from(err: ErrorType) -> Self {
        FinalizeError::Db(err.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestEffect {
    PaymentConfirmed {
        payment_id: String,
        cycle_completed: bool,
    },
    PaymentFailed {
        payment_id: String,
        retry_scheduled: bool,
        group_paused: bool,
    },
    PayoutReversed {
        payout_id: String,
    },
    GroupPauseQueued {
        group_id: String,
    },
    /// Stored for audit; no cycle effect (e.g. mandate confirmations).
    Recorded,
    NoOp(String),
}

#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub effect: IngestEffect,
    pub notifications: Vec<Notification>,
}

impl IngestOutcome {
    fn noop(reason: impl Into<String>) -> IngestOutcome {
        IngestOutcome {
            effect: IngestEffect::NoOp(reason.into()),
            notifications: vec![],
        }
    }
}

#[derive(Clone)]
pub struct WebhookIngestor {
    db: DbExecutor,
    cycle_cfg: CycleConfig,
    queue_cfg: QueueConfig,
}

impl WebhookIngestor {
    pub fn new(db: DbExecutor, cycle_cfg: CycleConfig, queue_cfg: QueueConfig) -> WebhookIngestor {
        WebhookIngestor {
            db,
            cycle_cfg,
            queue_cfg,
        }
    }

    pub async fn ingest(&self, event: GatewayEvent) -> Result<IngestOutcome, IngestError> {
        let payload =
            serde_json::to_string(&event).expect("an already-decoded event re-serializes");
        let cycle_cfg = self.cycle_cfg.clone();
        let queue_cfg = self.queue_cfg.clone();

        let outcome = self
            .db
            .with_transaction(move |conn| {
                let row = WebhookEventRow::new(&event.event_id, event.kind.as_str(), &payload);
                if !dao::record_event_if_new(conn, &row)? {
                    log::debug!("Event [{}] redelivered", event.event_id);
                    metrics::counter!("tanda.webhook.events.redelivered", 1);
                }
                let outcome = apply_event(conn, &event, &cycle_cfg, &queue_cfg)?;
                dao::mark_event_applied(conn, &event.event_id)?;
                Ok::<IngestOutcome, IngestError>(outcome)
            })
            .await?;

        metrics::counter!("tanda.webhook.events", 1);
        Ok(outcome)
    }

    /// Re-applies a stored envelope. Safe because every transition is
    /// status-guarded; the common case is a no-op.
    pub async fn replay(&self, event_id: &str) -> Result<Option<IngestOutcome>, IngestError> {
        let row = match self.db.as_dao::<dao::WebhookEventDao>().get(event_id).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let event: GatewayEvent = serde_json::from_str(&row.payload)
            .map_err(|e| IngestError::BadStoredEvent(event_id.to_string(), e))?;

        let cycle_cfg = self.cycle_cfg.clone();
        let queue_cfg = self.queue_cfg.clone();
        let outcome = self
            .db
            .with_transaction(move |conn| apply_event(conn, &event, &cycle_cfg, &queue_cfg))
            .await?;
        metrics::counter!("tanda.webhook.events.replayed", 1);
        Ok(Some(outcome))
    }
}

fn apply_event(
    conn: &ConnType,
    event: &GatewayEvent,
    cycle_cfg: &CycleConfig,
    queue_cfg: &QueueConfig,
) -> Result<IngestOutcome, IngestError> {
    match event.kind {
        EventKind::IntentSucceeded => match &event.intent_id {
            Some(intent_id) => intent_succeeded(conn, event, intent_id, queue_cfg),
            None => Ok(IngestOutcome::noop("event carries no intentId")),
        },
        EventKind::IntentFailed => match &event.intent_id {
            Some(intent_id) => intent_failed(conn, event, intent_id, cycle_cfg, queue_cfg),
            None => Ok(IngestOutcome::noop("event carries no intentId")),
        },
        EventKind::TransferReversed => match &event.transfer_id {
            Some(transfer_id) => transfer_reversed(conn, transfer_id),
            None => Ok(IngestOutcome::noop("event carries no transferId")),
        },
        EventKind::MandateConfirmed => Ok(IngestOutcome {
            effect: IngestEffect::Recorded,
            notifications: vec![],
        }),
        EventKind::AccountSuspended => match &event.account_id {
            Some(account_id) => account_suspended(conn, account_id, queue_cfg),
            None => Ok(IngestOutcome::noop("event carries no accountId")),
        },
        EventKind::Unknown => Ok(IngestOutcome::noop("unknown event kind")),
    }
}

fn intent_succeeded(
    conn: &ConnType,
    event: &GatewayEvent,
    intent_id: &str,
    queue_cfg: &QueueConfig,
) -> Result<IngestOutcome, IngestError> {
    let mut payment = match dao::find_payment_by_intent(conn, intent_id)? {
        Some(payment) => payment,
        None => return Ok(IngestOutcome::noop("no payment for this intent")),
    };

    if payment.status != PaymentStatus::Successful {
        dao::update_payment_status(conn, &mut payment, PaymentStatus::Successful, false, None)?;
        metrics::counter!("tanda.cycle.payments.succeeded", 1);
    }
    dao::recompute_aggregates(conn, &payment.group_id)?;

    let (cycle_completed, notifications) = finalize_cycle_if_complete(
        conn,
        &payment.group_id,
        payment.cycle_number,
        event.transfer_id.as_deref(),
        queue_cfg,
    )?;

    Ok(IngestOutcome {
        effect: IngestEffect::PaymentConfirmed {
            payment_id: payment.id.clone(),
            cycle_completed,
        },
        notifications,
    })
}

/// Finalization: once every debit of a cycle is Successful, create the
/// payout (Completed, since the funds rode the debit intents), mark the payee
/// paid and roll the schedule forward. The unique payout index makes racing
/// callers collapse to one finalization. Also reachable from the retry
/// processor when it reconciles a lost success callback.
pub(crate) fn finalize_cycle_if_complete(
    conn: &ConnType,
    group_id: &str,
    cycle_number: i32,
    transfer_id: Option<&str>,
    queue_cfg: &QueueConfig,
) -> Result<(bool, Vec<Notification>), FinalizeError> {
    let payments = dao::list_cycle_payments(conn, group_id, cycle_number)?;
    let all_successful = !payments.is_empty()
        && payments
            .iter()
            .all(|p| p.status == PaymentStatus::Successful);

    if !all_successful || dao::get_payout_by_cycle(conn, group_id, cycle_number)?.is_some() {
        return Ok((false, vec![]));
    }

    let mut group =
        dao::get_group(conn, group_id)?.ok_or_else(|| FinalizeError::Inconsistent {
            group_id: group_id.to_string(),
            cycle_number,
            message: "payments reference a missing group".to_string(),
        })?;
    let members = dao::active_members(conn, &group.id)?;
    let payee = members
        .iter()
        .find(|m| m.payout_order == cycle_number)
        .ok_or_else(|| FinalizeError::Inconsistent {
            group_id: group_id.to_string(),
            cycle_number,
            message: "no active member holds this cycle's payout order".to_string(),
        })?;

    let pooled: BigDecimal = payments
        .iter()
        .map(|p| p.amount.0.clone())
        .fold(BigDecimal::from(0), |acc, a| acc + a);

    let mut payout = Payout::new(&group.id, &payee.id, cycle_number, pooled, PayoutStatus::Completed);
    // The provider reports the outbound transfer alongside the last
    // confirmed debit; keep its id so a later reversal can find us.
    payout.gateway_transfer_id = transfer_id.map(str::to_string);

    let mut notifications = vec![];
    if let PayoutCreateOutcome::Created(payout) = dao::create_payout_if_absent(conn, payout)? {
        dao::set_member_paid(conn, &payee.id)?;
        notifications.push(Notification::PayoutSent {
            group_id: group.id.clone(),
            member_id: payee.id.clone(),
            cycle_number: payout.cycle_number,
        });

        match scheduler::advance(conn, &mut group, queue_cfg.max_job_attempts)? {
            AdvanceOutcome::AllPaid => {
                notifications.push(Notification::GroupPaused {
                    group_id: group.id.clone(),
                    reason: PauseReason::AllPaid,
                });
            }
            AdvanceOutcome::Scheduled(date) => {
                log::info!(
                    "Cycle {} of group [{}] complete; next cycle on {}",
                    payout.cycle_number,
                    group.id,
                    date
                );
            }
        }
        metrics::counter!("tanda.cycle.payouts.completed", 1);
        return Ok((true, notifications));
    }
    Ok((false, notifications))
}

fn intent_failed(
    conn: &ConnType,
    event: &GatewayEvent,
    intent_id: &str,
    cycle_cfg: &CycleConfig,
    queue_cfg: &QueueConfig,
) -> Result<IngestOutcome, IngestError> {
    let mut payment = match dao::find_payment_by_intent(conn, intent_id)? {
        Some(payment) => payment,
        None => return Ok(IngestOutcome::noop("no payment for this intent")),
    };

    if payment.status == PaymentStatus::Failed {
        return Ok(IngestOutcome::noop("payment already failed"));
    }

    dao::update_payment_status(conn, &mut payment, PaymentStatus::Failed, true, None)?;
    dao::recompute_aggregates(conn, &payment.group_id)?;
    metrics::counter!("tanda.cycle.payments.failed", 1);

    let reason = event.reason.as_deref().unwrap_or("unspecified");
    dao::append_log(
        conn,
        &NewJobLogEntry::new(
            Severity::Warn,
            format!(
                "Debit intent [{}] failed: {} (attempt {})",
                intent_id, reason, payment.retry_count
            ),
        )
        .for_group(&payment.group_id)
        .for_cycle(payment.cycle_number)
        .for_kind(JobKind::RetryPayment),
    )?;

    let mut notifications = vec![Notification::PaymentFailed {
        group_id: payment.group_id.clone(),
        member_id: payment.member_id.clone(),
        cycle_number: payment.cycle_number,
        retry_count: payment.retry_count,
    }];

    let (retry_scheduled, group_paused) = if payment.retry_count >= cycle_cfg.max_payment_retries {
        let mut group = dao::get_group(conn, &payment.group_id)?.ok_or_else(|| {
            IngestError::Inconsistent {
                event_id: event.event_id.clone(),
                message: format!("payment references missing group [{}]", payment.group_id),
            }
        })?;
        dao::pause_group(conn, &mut group, PauseReason::PaymentFailures)?;
        notifications.push(Notification::GroupPaused {
            group_id: group.id.clone(),
            reason: PauseReason::PaymentFailures,
        });
        (false, true)
    } else {
        let not_before = Utc::now().naive_utc() + to_chrono(cycle_cfg.retry_delay);
        let job = ScheduledJob::retry_payment(
            &payment.id,
            &payment.group_id,
            not_before,
            queue_cfg.max_job_attempts,
        );
        dao::enqueue_job(conn, &job)?;
        (true, false)
    };

    Ok(IngestOutcome {
        effect: IngestEffect::PaymentFailed {
            payment_id: payment.id.clone(),
            retry_scheduled,
            group_paused,
        },
        notifications,
    })
}

fn transfer_reversed(conn: &ConnType, transfer_id: &str) -> Result<IngestOutcome, IngestError> {
    let mut payout = match dao::find_payout_by_transfer(conn, transfer_id)? {
        Some(payout) => payout,
        None => return Ok(IngestOutcome::noop("no payout for this transfer")),
    };

    if payout.status == PayoutStatus::Failed {
        return Ok(IngestOutcome::noop("payout already failed"));
    }

    dao::update_payout_status(conn, &mut payout, PayoutStatus::Failed)?;
    dao::append_log(
        conn,
        &NewJobLogEntry::new(
            Severity::Error,
            format!("Transfer [{}] reversed by provider", transfer_id),
        )
        .for_group(&payout.group_id)
        .for_cycle(payout.cycle_number),
    )?;
    metrics::counter!("tanda.cycle.payouts.reversed", 1);

    Ok(IngestOutcome {
        effect: IngestEffect::PayoutReversed {
            payout_id: payout.id.clone(),
        },
        notifications: vec![],
    })
}

/// Upstream account problems pause the whole group, through the queue so
/// the pause survives a crash between ingest and effect.
fn account_suspended(
    conn: &ConnType,
    account_id: &str,
    queue_cfg: &QueueConfig,
) -> Result<IngestOutcome, IngestError> {
    let member = match dao::find_by_account_ref(conn, account_id)? {
        Some(member) => member,
        None => return Ok(IngestOutcome::noop("no member for this account")),
    };

    let job = ScheduledJob::group_pause(
        &member.group_id,
        PauseReason::Subscription,
        Utc::now().naive_utc(),
        queue_cfg.max_job_attempts,
    );
    dao::enqueue_job(conn, &job)?;

    Ok(IngestOutcome {
        effect: IngestEffect::GroupPauseQueued {
            group_id: member.group_id,
        },
        notifications: vec![],
    })
}
