//! Queue workers: poll, claim, dispatch. At-least-once delivery with a
//! visibility lease; a worker that stalls past its lease loses the job to a
//! peer, and every handler is idempotent enough that the overlap is a skip.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{to_chrono, QueueConfig};
use crate::db::dao::{JobLogDao, JobQueueDao};
use crate::db::model::{Job, NewJobLogEntry, ScheduledJob, Severity};
use crate::lock::JobLockMap;
use crate::notifier::{Notification, Notifier};
use crate::processor::{CycleProcessor, PauseProcessor, ProcessorError, RetryProcessor};
use crate::queue::notify::EnqueueNotifier;

use tanda_persistence::DbExecutor;

/// Extra slack on the visibility lease over the handler timeout, so the
/// owning worker always resolves the job before anyone can reclaim it.
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Poll-failure backoff cap (shared pool reconnect discipline).
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(10);

pub struct WorkerContext {
    pub db: DbExecutor,
    pub cycle_processor: CycleProcessor,
    pub retry_processor: RetryProcessor,
    pub pause_processor: PauseProcessor,
    pub notifier: Arc<dyn Notifier>,
    pub locks: JobLockMap,
    pub wakeup: EnqueueNotifier,
    pub queue_cfg: QueueConfig,
}

pub fn spawn_workers(ctx: Arc<WorkerContext>) {
    for idx in 0..ctx.queue_cfg.workers.max(1) {
        let ctx = ctx.clone();
        tokio::spawn(async move { worker_loop(ctx, idx).await });
    }
}

async fn worker_loop(ctx: Arc<WorkerContext>, idx: usize) {
    log::info!("Queue worker {} started", idx);
    let mut listener = ctx.wakeup.listen();
    let mut poll_failures = 0u32;
    let lease = to_chrono(ctx.queue_cfg.job_timeout + LEASE_MARGIN);

    loop {
        match ctx.db.as_dao::<JobQueueDao>().take_next(lease).await {
            Ok(Some(job)) => {
                poll_failures = 0;
                dispatch(&ctx, job).await;
            }
            Ok(None) => {
                poll_failures = 0;
                listener
                    .wait_with_timeout(ctx.queue_cfg.poll_interval)
                    .await;
            }
            Err(e) => {
                poll_failures += 1;
                let backoff = poll_backoff(poll_failures);
                log::error!(
                    "Queue worker {}: poll failed ({}); retrying in {:?}",
                    idx,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn poll_backoff(failures: u32) -> Duration {
    let base = Duration::from_millis(250 * 2u64.pow(failures.min(6)));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    (base + jitter).min(MAX_POLL_BACKOFF)
}

async fn dispatch(ctx: &Arc<WorkerContext>, job: ScheduledJob) {
    let queue = ctx.db.as_dao::<JobQueueDao>();

    let decoded = match job.to_job() {
        Ok(decoded) => decoded,
        Err(e) => {
            log::error!("Job [{}] cannot be decoded: {}", job.id, e);
            let _ = ctx
                .db
                .as_dao::<JobLogDao>()
                .append(
                    NewJobLogEntry::new(Severity::Error, e.to_string()).for_kind(job.kind),
                )
                .await;
            if let Err(e) = queue.dead(&job.id, &e.to_string()).await {
                log::error!("Failed to dead-letter job [{}]: {}", job.id, e);
            }
            return;
        }
    };

    // In-process dedup only; the store's unique indexes carry correctness
    // when two processes race.
    let lock_key = match &decoded {
        Job::CycleTick { group_id } | Job::GroupPause { group_id, .. } => group_id.clone(),
        Job::RetryPayment { payment_id } => payment_id.clone(),
    };
    let _guard = match ctx.locks.try_acquire(&lock_key, job.kind) {
        Some(guard) => guard,
        None => {
            log::info!(
                "Duplicate job [{}]: [{}/{}] is already being processed here",
                job.id,
                lock_key,
                job.kind
            );
            metrics::counter!("tanda.queue.jobs.duplicate", 1);
            if let Err(e) = queue.complete(&job.id).await {
                log::error!("Failed to complete duplicate job [{}]: {}", job.id, e);
            }
            return;
        }
    };

    match tokio::time::timeout(ctx.queue_cfg.job_timeout, run_job(ctx, &decoded)).await {
        Err(_elapsed) => {
            // The blocking store transaction cannot be interrupted from
            // here; it will either roll back or commit behind our backs.
            // Both are safe: redelivery of any cycle job degrades to skips.
            log::error!(
                "Job [{}] stalled past {:?}",
                job.id,
                ctx.queue_cfg.job_timeout
            );
            metrics::counter!("tanda.queue.jobs.stalled", 1);
            let _ = ctx
                .db
                .as_dao::<JobLogDao>()
                .append(
                    NewJobLogEntry::new(
                        Severity::Error,
                        format!("Job [{}] exceeded its timeout", job.id),
                    )
                    .for_kind(job.kind),
                )
                .await;
            if let Err(e) = queue.fail(&job.id, "job timed out").await {
                log::error!("Failed to fail stalled job [{}]: {}", job.id, e);
            }
        }
        Ok(Ok(notifications)) => {
            if let Err(e) = queue.complete(&job.id).await {
                log::error!("Failed to complete job [{}]: {}", job.id, e);
            }
            metrics::counter!("tanda.queue.jobs.completed", 1);
            for notification in notifications {
                ctx.notifier.notify(notification);
            }
        }
        Ok(Err(err)) => {
            log::warn!("Job [{}] failed: {}", job.id, err);
            if let Some((group_id, cycle_number, message)) = err.invariant_details() {
                let _ = ctx
                    .db
                    .as_dao::<JobLogDao>()
                    .append(
                        NewJobLogEntry::new(Severity::Error, message)
                            .for_group(group_id)
                            .for_cycle(cycle_number)
                            .for_kind(job.kind),
                    )
                    .await;
            }
            let result = if err.is_fatal() {
                queue.dead(&job.id, &err.to_string()).await.map(|_| ())
            } else {
                queue.fail(&job.id, &err.to_string()).await.map(|_| ())
            };
            if let Err(e) = result {
                log::error!("Failed to record failure of job [{}]: {}", job.id, e);
            }
            metrics::counter!("tanda.queue.jobs.failed", 1);
        }
    }
}

async fn run_job(
    ctx: &Arc<WorkerContext>,
    job: &Job,
) -> Result<Vec<Notification>, ProcessorError> {
    match job {
        Job::CycleTick { group_id } => {
            let outcome = ctx.cycle_processor.process_tick(group_id).await?;
            Ok(outcome.notifications)
        }
        Job::RetryPayment { payment_id } => {
            let outcome = ctx.retry_processor.process(payment_id).await?;
            Ok(outcome.notifications)
        }
        Job::GroupPause { group_id, reason } => {
            ctx.pause_processor.process(group_id, *reason).await
        }
    }
}
