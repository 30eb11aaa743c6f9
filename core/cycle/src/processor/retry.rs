//! Retry of a single failed payment with the escalated fee. Refuses to act
//! unless the group is Active and the payment is Failed, so stale retry
//! jobs degrade to no-ops.

use std::sync::Arc;

use chrono::Utc;

use tanda_gateway::{DebitSpec, GatewayDriver, GatewayError, IntentStatus};
use tanda_persistence::DbExecutor;

use crate::config::{to_chrono, CycleConfig, QueueConfig};
use crate::db::dao;
use crate::db::model::{
    GroupStatus, JobKind, NewJobLogEntry, PauseReason, PaymentStatus, ScheduledJob, Severity,
};
use crate::fees::{to_cents, FeePolicy};
use crate::notifier::Notification;
use crate::processor::cycle::create_intent_with_retry;
use crate::processor::ProcessorError;
use crate::rate::RateLimiter;
use crate::webhook::finalize_cycle_if_complete;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryEffect {
    /// A new intent was registered; the payment is Pending again.
    Retried { cycle_number: i32 },
    /// The provider refused again.
    RefusedAgain { retry_count: i32, group_paused: bool },
    /// The provider says the previous intent actually succeeded; the
    /// failure we acted on was stale or its success callback got lost.
    AlreadySettled {
        cycle_number: i32,
        cycle_completed: bool,
    },
    Skipped(String),
}

#[derive(Clone, Debug)]
pub struct RetryOutcome {
    pub effect: RetryEffect,
    pub notifications: Vec<Notification>,
}

impl RetryOutcome {
    fn skipped(reason: impl Into<String>) -> RetryOutcome {
        RetryOutcome {
            effect: RetryEffect::Skipped(reason.into()),
            notifications: vec![],
        }
    }
}

#[derive(Clone)]
pub struct RetryProcessor {
    db: DbExecutor,
    gateway: Arc<dyn GatewayDriver>,
    limiter: Arc<RateLimiter>,
    fees: FeePolicy,
    cycle_cfg: CycleConfig,
    queue_cfg: QueueConfig,
}

impl RetryProcessor {
    pub fn new(
        db: DbExecutor,
        gateway: Arc<dyn GatewayDriver>,
        limiter: Arc<RateLimiter>,
        cycle_cfg: CycleConfig,
        queue_cfg: QueueConfig,
    ) -> RetryProcessor {
        RetryProcessor {
            db,
            fees: FeePolicy::from_config(&cycle_cfg),
            gateway,
            limiter,
            cycle_cfg,
            queue_cfg,
        }
    }

    pub async fn process(&self, payment_id: &str) -> Result<RetryOutcome, ProcessorError> {
        let payment_id = payment_id.to_string();
        let gateway = self.gateway.clone();
        let limiter = self.limiter.clone();
        let fees = self.fees.clone();
        let cfg = self.cycle_cfg.clone();

        let queue_cfg = self.queue_cfg.clone();
        let outcome = self
            .db
            .with_transaction(move |conn| {
                run_retry(
                    conn,
                    &payment_id,
                    gateway.as_ref(),
                    &limiter,
                    &fees,
                    &cfg,
                    &queue_cfg,
                )
            })
            .await?;

        if let RetryEffect::Retried { cycle_number } = &outcome.effect {
            metrics::counter!("tanda.cycle.payments.retried", 1);
            log::info!("Payment retry registered for cycle {}", cycle_number);
        }
        Ok(outcome)
    }
}

fn run_retry(
    conn: &tanda_persistence::ConnType,
    payment_id: &str,
    gateway: &dyn GatewayDriver,
    limiter: &RateLimiter,
    fees: &FeePolicy,
    cfg: &CycleConfig,
    queue_cfg: &QueueConfig,
) -> Result<RetryOutcome, ProcessorError> {
    let max_job_attempts = queue_cfg.max_job_attempts;
    let mut payment = match dao::find_payment(conn, payment_id)? {
        Some(payment) => payment,
        None => return Ok(RetryOutcome::skipped("payment not found")),
    };
    let mut group = dao::get_group(conn, &payment.group_id)?.ok_or_else(|| {
        ProcessorError::invariant(
            &payment.group_id,
            payment.cycle_number,
            "payment references a missing group",
        )
    })?;

    if group.status != GroupStatus::Active {
        return Ok(RetryOutcome::skipped(format!(
            "group is {}, not Active",
            group.status
        )));
    }
    if payment.status != PaymentStatus::Failed {
        return Ok(RetryOutcome::skipped(format!(
            "payment is {}, not Failed",
            payment.status
        )));
    }

    // The failure may be stale: if the provider settled the previous intent
    // and the success callback got lost, adopt the success instead of
    // debiting the member a second time.
    if let Some(intent_id) = payment.gateway_intent_id.clone() {
        match gateway.get_intent(&intent_id) {
            Ok(state) if state.status == IntentStatus::Succeeded => {
                dao::update_payment_status(
                    conn,
                    &mut payment,
                    PaymentStatus::Successful,
                    false,
                    None,
                )?;
                dao::recompute_aggregates(conn, &group.id)?;
                let (cycle_completed, notifications) = finalize_cycle_if_complete(
                    conn,
                    &group.id,
                    payment.cycle_number,
                    None,
                    queue_cfg,
                )?;
                log::info!(
                    "Intent [{}] had already succeeded; payment adopted as Successful",
                    intent_id
                );
                return Ok(RetryOutcome {
                    effect: RetryEffect::AlreadySettled {
                        cycle_number: payment.cycle_number,
                        cycle_completed,
                    },
                    notifications,
                });
            }
            Ok(_) => {}
            Err(e) => {
                log::debug!("Could not reconcile intent [{}]: {}", intent_id, e);
            }
        }
    }

    let members = dao::active_members(conn, &group.id)?;
    let debtor = members
        .iter()
        .find(|m| m.id == payment.member_id)
        .cloned()
        .ok_or_else(|| {
            ProcessorError::invariant(
                &group.id,
                payment.cycle_number,
                "debtor is no longer an active member",
            )
        })?;
    let payee_account = members
        .iter()
        .find(|m| m.payout_order == payment.cycle_number)
        .and_then(|m| m.account_ref.clone())
        .ok_or_else(|| {
            ProcessorError::invariant(
                &group.id,
                payment.cycle_number,
                "cycle payee has no account reference",
            )
        })?;

    let (debtor_account, mandate) = match (&debtor.account_ref, &debtor.mandate_ref) {
        (Some(account), Some(mandate)) => (account.clone(), mandate.clone()),
        _ => return Ok(RetryOutcome::skipped("debtor has no usable mandate")),
    };

    // Escalated fee: any retried debit carries the surcharge once.
    let fee = fees.application_fee(&payment.amount.0, payment.retry_count.max(1));
    let amount_cents = to_cents(&payment.amount.0).ok_or_else(|| {
        ProcessorError::invariant(&group.id, payment.cycle_number, "amount overflows cents")
    })?;
    let application_fee_cents = to_cents(&fee).ok_or_else(|| {
        ProcessorError::invariant(&group.id, payment.cycle_number, "fee overflows cents")
    })?;

    let spec = DebitSpec {
        debtor_account,
        mandate,
        amount_cents,
        transfer_to: payee_account,
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
            "retry": true,
        }),
    };

    let mut notifications = vec![];

    limiter.acquire(&group.id);
    let effect = match create_intent_with_retry(gateway, &spec) {
        Ok(intent_id) => {
            dao::update_payment_status(
                conn,
                &mut payment,
                PaymentStatus::Pending,
                false,
                Some(&intent_id),
            )?;
            RetryEffect::Retried {
                cycle_number: payment.cycle_number,
            }
        }
        Err(GatewayError::Permanent(reason)) => {
            dao::bump_payment_retry(conn, &mut payment)?;
            dao::append_log(
                conn,
                &NewJobLogEntry::new(
                    Severity::Warn,
                    format!(
                        "Retry of member [{}] refused by gateway: {} (attempt {})",
                        payment.member_id, reason, payment.retry_count
                    ),
                )
                .for_group(&group.id)
                .for_cycle(payment.cycle_number)
                .for_kind(JobKind::RetryPayment),
            )?;
            notifications.push(Notification::PaymentFailed {
                group_id: group.id.clone(),
                member_id: payment.member_id.clone(),
                cycle_number: payment.cycle_number,
                retry_count: payment.retry_count,
            });

            let group_paused = if payment.retry_count >= cfg.max_payment_retries {
                dao::pause_group(conn, &mut group, PauseReason::PaymentFailures)?;
                notifications.push(Notification::GroupPaused {
                    group_id: group.id.clone(),
                    reason: PauseReason::PaymentFailures,
                });
                true
            } else {
                let not_before = Utc::now().naive_utc() + to_chrono(cfg.retry_delay);
                let job = ScheduledJob::retry_payment(
                    &payment.id,
                    &group.id,
                    not_before,
                    max_job_attempts,
                );
                dao::enqueue_job(conn, &job)?;
                false
            };
            RetryEffect::RefusedAgain {
                retry_count: payment.retry_count,
                group_paused,
            }
        }
        Err(err @ GatewayError::Transient(_)) => {
            return Err(ProcessorError::Gateway(err));
        }
    };

    dao::recompute_aggregates(conn, &group.id)?;
    Ok(RetryOutcome {
        effect,
        notifications,
    })
}
