//! One run = one cycle tick for one group: derive the cycle number from the
//! payout count, pick the payee, open Pending payments and register debit
//! intents with the gateway. Everything happens inside a single store
//! transaction; idempotency comes from the unique payment key, so a
//! concurrent or redelivered tick degrades to skips.
//!
//! The payout is deliberately NOT created here. Money moves outward only
//! after every debit is confirmed, which is the webhook ingestor's call.

use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::Utc;
use rand::Rng;

use tanda_gateway::{DebitSpec, GatewayDriver, GatewayError};
use tanda_persistence::DbExecutor;

use crate::config::{to_chrono, CycleConfig, QueueConfig};
use crate::db::dao::{self, CreateOutcome};
use crate::db::model::{
    Group, GroupStatus, JobKind, Member, NewJobLogEntry, PauseReason, Payment, PaymentStatus,
    ScheduledJob, Severity,
};
use crate::fees::{to_cents, FeePolicy};
use crate::notifier::Notification;
use crate::processor::ProcessorError;
use crate::rate::RateLimiter;

const GATEWAY_INPLACE_RETRIES: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickEffect {
    Ticked {
        cycle_number: i32,
        payments_created: usize,
        payments_skipped: usize,
    },
    /// No active unpaid member remains; the group parked as Paused/AllPaid.
    AllPaid,
    /// Guard tripped; the world is unchanged.
    Skipped(String),
}

#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub effect: TickEffect,
    pub notifications: Vec<Notification>,
}

impl TickOutcome {
    fn skipped(reason: impl Into<String>) -> TickOutcome {
        TickOutcome {
            effect: TickEffect::Skipped(reason.into()),
            notifications: vec![],
        }
    }
}

#[derive(Clone)]
pub struct CycleProcessor {
    db: DbExecutor,
    gateway: Arc<dyn GatewayDriver>,
    limiter: Arc<RateLimiter>,
    fees: FeePolicy,
    cycle_cfg: CycleConfig,
    queue_cfg: QueueConfig,
}

impl CycleProcessor {
    pub fn new(
        db: DbExecutor,
        gateway: Arc<dyn GatewayDriver>,
        limiter: Arc<RateLimiter>,
        cycle_cfg: CycleConfig,
        queue_cfg: QueueConfig,
    ) -> CycleProcessor {
        CycleProcessor {
            db,
            fees: FeePolicy::from_config(&cycle_cfg),
            gateway,
            limiter,
            cycle_cfg,
            queue_cfg,
        }
    }

    pub async fn process_tick(&self, group_id: &str) -> Result<TickOutcome, ProcessorError> {
        let group_id = group_id.to_string();
        let gateway = self.gateway.clone();
        let limiter = self.limiter.clone();
        let fees = self.fees.clone();
        let cfg = self.cycle_cfg.clone();
        let max_job_attempts = self.queue_cfg.max_job_attempts;

        let outcome = self
            .db
            .with_transaction(move |conn| {
                run_tick(
                    conn,
                    &group_id,
                    gateway.as_ref(),
                    &limiter,
                    &fees,
                    &cfg,
                    max_job_attempts,
                )
            })
            .await?;

        if let TickEffect::Ticked {
            cycle_number,
            payments_created,
            ..
        } = &outcome.effect
        {
            metrics::counter!("tanda.cycle.ticks", 1);
            metrics::counter!("tanda.cycle.payments.created", *payments_created as u64);
            log::info!(
                "Cycle {} tick done for group: {} payments created",
                cycle_number,
                payments_created
            );
        }
        Ok(outcome)
    }
}

fn run_tick(
    conn: &tanda_persistence::ConnType,
    group_id: &str,
    gateway: &dyn GatewayDriver,
    limiter: &RateLimiter,
    fees: &FeePolicy,
    cfg: &CycleConfig,
    max_job_attempts: i32,
) -> Result<TickOutcome, ProcessorError> {
    let mut group = match dao::get_group(conn, group_id)? {
        Some(group) => group,
        None => return Ok(TickOutcome::skipped("group not found")),
    };

    if group.status != GroupStatus::Active {
        return Ok(TickOutcome::skipped(format!(
            "group is {}, not Active",
            group.status
        )));
    }
    if !group.cycle_started {
        return Ok(TickOutcome::skipped("cycle not started"));
    }
    if group.contribution_amount.0 <= BigDecimal::from(0) {
        return Ok(TickOutcome::skipped("non-positive contribution amount"));
    }

    let members = dao::active_members(conn, group_id)?;
    let unpaid: Vec<Member> = members
        .iter()
        .filter(|m| !m.has_been_paid)
        .cloned()
        .collect();
    let cycle_number = dao::last_cycle_number(conn, group_id)? + 1;

    if unpaid.is_empty() {
        dao::pause_group(conn, &mut group, PauseReason::AllPaid)?;
        return Ok(TickOutcome {
            effect: TickEffect::AllPaid,
            notifications: vec![Notification::GroupPaused {
                group_id: group_id.to_string(),
                reason: PauseReason::AllPaid,
            }],
        });
    }

    let payee = unpaid
        .iter()
        .find(|m| m.payout_order == cycle_number)
        .cloned()
        .ok_or_else(|| {
            ProcessorError::invariant(
                group_id,
                cycle_number,
                "no active unpaid member holds this cycle's payout order",
            )
        })?;
    let payee_account = payee.account_ref.clone().ok_or_else(|| {
        ProcessorError::invariant(group_id, cycle_number, "payee has no account reference")
    })?;

    let mut payments_created = 0usize;
    let mut payments_skipped = 0usize;
    let mut notifications = vec![];

    // Every other active member contributes, whether or not their own
    // payout already happened; only the payee sits a cycle out.
    for debtor in members.iter().filter(|m| m.id != payee.id) {
        let fresh = Payment::new(
            group_id,
            &debtor.id,
            cycle_number,
            group.contribution_amount.0.clone(),
        );
        let mut payment = match dao::create_payment_if_absent(conn, fresh)? {
            CreateOutcome::Created(payment) => payment,
            CreateOutcome::Existing(_) => {
                log::debug!(
                    "Payment for member [{}] cycle {} already exists; skipping",
                    debtor.id,
                    cycle_number
                );
                payments_skipped += 1;
                continue;
            }
        };
        payments_created += 1;

        let (debtor_account, mandate) = match (&debtor.account_ref, &debtor.mandate_ref) {
            (Some(account), Some(mandate)) => (account.clone(), mandate.clone()),
            _ => {
                dao::append_log(
                    conn,
                    &NewJobLogEntry::new(
                        Severity::Warn,
                        format!("Member [{}] has no usable mandate; debit skipped", debtor.id),
                    )
                    .for_group(group_id)
                    .for_cycle(cycle_number)
                    .for_kind(JobKind::CycleTick),
                )?;
                payments_skipped += 1;
                continue;
            }
        };

        let spec = debit_spec(
            &group,
            &payment,
            debtor,
            &debtor_account,
            &mandate,
            &payee_account,
            fees,
        )?;

        limiter.acquire(group_id);
        match create_intent_with_retry(gateway, &spec) {
            Ok(intent_id) => {
                dao::set_payment_intent(conn, &mut payment, &intent_id)?;
            }
            Err(GatewayError::Permanent(reason)) => {
                handle_permanent_refusal(
                    conn,
                    &mut group,
                    &mut payment,
                    &reason,
                    cfg,
                    max_job_attempts,
                    &mut notifications,
                )?;
            }
            Err(err @ GatewayError::Transient(_)) => {
                return Err(ProcessorError::Gateway(err));
            }
        }
    }

    dao::recompute_aggregates(conn, group_id)?;

    if payments_created > 0 {
        notifications.insert(
            0,
            Notification::CycleStarted {
                group_id: group_id.to_string(),
                cycle_number,
            },
        );
    }

    Ok(TickOutcome {
        effect: TickEffect::Ticked {
            cycle_number,
            payments_created,
            payments_skipped,
        },
        notifications,
    })
}

fn debit_spec(
    group: &Group,
    payment: &Payment,
    debtor: &Member,
    debtor_account: &str,
    mandate: &str,
    payee_account: &str,
    fees: &FeePolicy,
) -> Result<DebitSpec, ProcessorError> {
    let fee = fees.application_fee(&payment.amount.0, payment.retry_count);
    let amount_cents = to_cents(&payment.amount.0).ok_or_else(|| {
        ProcessorError::invariant(&group.id, payment.cycle_number, "amount overflows cents")
    })?;
    let application_fee_cents = to_cents(&fee).ok_or_else(|| {
        ProcessorError::invariant(&group.id, payment.cycle_number, "fee overflows cents")
    })?;

    Ok(DebitSpec {
        debtor_account: debtor_account.to_string(),
        mandate: mandate.to_string(),
        amount_cents,
        transfer_to: payee_account.to_string(),
        application_fee_cents,
        idempotency_key: format!(
            "{}-{}-{}-{}",
            group.id, payment.cycle_number, debtor.id, payment.retry_count
        ),
        metadata: serde_json::json!({
            "groupId": group.id,
            "cycleNumber": payment.cycle_number,
            "memberId": debtor.id,
            "paymentId": payment.id,
        }),
    })
}

/// Permanent refusal: the payment fails immediately with one attempt burnt.
/// Below the threshold a delayed retry job is scheduled; at the threshold
/// the whole group pauses.
pub(crate) fn handle_permanent_refusal(
    conn: &tanda_persistence::ConnType,
    group: &mut Group,
    payment: &mut Payment,
    reason: &str,
    cfg: &CycleConfig,
    max_job_attempts: i32,
    notifications: &mut Vec<Notification>,
) -> Result<(), ProcessorError> {
    dao::update_payment_status(conn, payment, PaymentStatus::Failed, true, None)?;
    dao::append_log(
        conn,
        &NewJobLogEntry::new(
            Severity::Warn,
            format!(
                "Debit of member [{}] refused by gateway: {} (attempt {})",
                payment.member_id, reason, payment.retry_count
            ),
        )
        .for_group(&group.id)
        .for_cycle(payment.cycle_number)
        .for_kind(JobKind::CycleTick),
    )?;
    metrics::counter!("tanda.cycle.payments.failed", 1);

    notifications.push(Notification::PaymentFailed {
        group_id: group.id.clone(),
        member_id: payment.member_id.clone(),
        cycle_number: payment.cycle_number,
        retry_count: payment.retry_count,
    });

    if payment.retry_count >= cfg.max_payment_retries {
        dao::pause_group(conn, group, PauseReason::PaymentFailures)?;
        notifications.push(Notification::GroupPaused {
            group_id: group.id.clone(),
            reason: PauseReason::PaymentFailures,
        });
    } else {
        let not_before = Utc::now().naive_utc() + to_chrono(cfg.retry_delay);
        let job = ScheduledJob::retry_payment(&payment.id, &group.id, not_before, max_job_attempts);
        dao::enqueue_job(conn, &job)?;
    }
    Ok(())
}

/// Transient gateway errors are retried in place with jitter before they
/// bubble up to the queue.
pub(crate) fn create_intent_with_retry(
    gateway: &dyn GatewayDriver,
    spec: &DebitSpec,
) -> Result<String, GatewayError> {
    let mut attempt = 0;
    loop {
        match gateway.create_debit_intent(spec) {
            Err(GatewayError::Transient(reason)) if attempt + 1 < GATEWAY_INPLACE_RETRIES => {
                attempt += 1;
                let jitter = rand::thread_rng().gen_range(50..250);
                log::debug!(
                    "Transient gateway error ({}); retrying in-place, attempt {}",
                    reason,
                    attempt
                );
                std::thread::sleep(Duration::from_millis(100 * attempt as u64 + jitter));
            }
            other => return other,
        }
    }
}
