//! Structure connecting all orchestrator objects: processors, queue
//! workers, webhook ingestor and the admin operations the REST surface and
//! the operator CLI call into.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use tanda_gateway::{GatewayDriver, GatewayEvent};
use tanda_persistence::DbExecutor;

use crate::config::Config;
use crate::db::dao::{self, GroupDao, GroupDaoError, JobLogDao, JobQueueDao, PaymentDao, PayoutDao};
use crate::db::model::{
    CycleFrequency, Group, GroupStatus, JobLogEntry, JobState, PauseReason, Payment, Payout,
};
use crate::db::DbError;
use crate::lock::JobLockMap;
use crate::notifier::{Notification, Notifier};
use crate::processor::{CycleProcessor, PauseProcessor, RetryProcessor};
use crate::queue::{spawn_workers, EnqueueNotifier, WorkerContext};
use crate::rate::RateLimiter;
use crate::scheduler::{self, SchedulerError};
use crate::webhook::{IngestError, IngestOutcome, WebhookIngestor};

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("Failed to migrate database. Error: {0}")]
    Migration(#[from] anyhow::Error),
    #[error("Failed to initialize config. Error: {0}")]
    Config(#[from] structopt::clap::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Group [{0}] not found")]
    GroupNotFound(String),
    #[error("Webhook event [{0}] not found")]
    EventNotFound(String),
    #[error("Cycle already started for group [{0}]")]
    AlreadyStarted(String),
    #[error("Group [{0}] is not paused")]
    NotPaused(String),
    #[error("Group [{0}] has no active members")]
    NoMembers(String),
    #[error(transparent)]
    Group(#[from] GroupDaoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("Database error: {0}")]
    Db(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for ServiceError {
    fn from(err: ErrorType) -> Self {
        ServiceError::Db(err.into())
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub dead: usize,
}

pub struct CycleService {
    pub db: DbExecutor,
    config: Arc<Config>,
    notifier: Arc<dyn Notifier>,
    ingestor: WebhookIngestor,
    wakeup: EnqueueNotifier,
    worker_ctx: Arc<WorkerContext>,
}

impl CycleService {
    pub fn new(
        db: &DbExecutor,
        gateway: Arc<dyn GatewayDriver>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Result<Arc<CycleService>, InitError> {
        metrics::counter!("tanda.cycle.ticks", 0);
        metrics::counter!("tanda.cycle.payments.created", 0);
        metrics::counter!("tanda.cycle.payments.succeeded", 0);
        metrics::counter!("tanda.cycle.payments.failed", 0);
        metrics::counter!("tanda.cycle.payouts.completed", 0);
        metrics::counter!("tanda.webhook.events", 0);
        metrics::counter!("tanda.queue.jobs.completed", 0);
        metrics::counter!("tanda.queue.jobs.failed", 0);

        db.apply_migration(|conn| {
            crate::db::migrations::run_with_output(conn, &mut std::io::stdout())
        })?;

        let locks = JobLockMap::new(config.cycle.local_lock_ttl);
        let limiter = Arc::new(RateLimiter::new(config.cycle.gateway_group_rate));
        let wakeup = EnqueueNotifier::new();

        let cycle_processor = CycleProcessor::new(
            db.clone(),
            gateway.clone(),
            limiter.clone(),
            config.cycle.clone(),
            config.queue.clone(),
        );
        let retry_processor = RetryProcessor::new(
            db.clone(),
            gateway,
            limiter,
            config.cycle.clone(),
            config.queue.clone(),
        );
        let pause_processor = PauseProcessor::new(db.clone());
        let ingestor = WebhookIngestor::new(db.clone(), config.cycle.clone(), config.queue.clone());

        let worker_ctx = Arc::new(WorkerContext {
            db: db.clone(),
            cycle_processor,
            retry_processor,
            pause_processor,
            notifier: notifier.clone(),
            locks,
            wakeup: wakeup.clone(),
            queue_cfg: config.queue.clone(),
        });

        Ok(Arc::new(CycleService {
            db: db.clone(),
            config,
            notifier,
            ingestor,
            wakeup,
            worker_ctx,
        }))
    }

    /// Spawns the queue workers and the database cleaner.
    pub fn spawn_background(&self) {
        spawn_workers(self.worker_ctx.clone());

        let cleaner_db = self.db.clone();
        let db_cfg = self.config.db.clone();
        tokio::spawn(async move {
            dao::cleaner::clean_forever(cleaner_db, db_cfg).await;
        });
    }

    /// Admin `StartCycle`: populate the schedule (one cycle per active
    /// member), activate the group, enqueue the first tick.
    pub async fn start_cycle(
        &self,
        group_id: &str,
        first_cycle_date: NaiveDate,
        frequency: CycleFrequency,
    ) -> Result<Group, ServiceError> {
        let group_id = group_id.to_string();
        let max_job_attempts = self.config.queue.max_job_attempts;

        let group = self
            .db
            .with_transaction(move |conn| {
                let mut group = dao::get_group(conn, &group_id)?
                    .ok_or_else(|| ServiceError::GroupNotFound(group_id.clone()))?;
                if group.cycle_started {
                    return Err(ServiceError::AlreadyStarted(group_id));
                }
                let members = dao::active_members(conn, &group_id)?;
                if members.is_empty() {
                    return Err(ServiceError::NoMembers(group_id));
                }
                dao::set_frequency(conn, &mut group, frequency)?;
                scheduler::start(
                    conn,
                    &mut group,
                    first_cycle_date,
                    members.len(),
                    max_job_attempts,
                )?;
                Ok(group)
            })
            .await?;

        log::info!(
            "Cycle schedule started for group [{}]: first cycle {}",
            group.id,
            first_cycle_date
        );
        self.wakeup.notify();
        Ok(group)
    }

    pub async fn pause_group(
        &self,
        group_id: &str,
        reason: PauseReason,
    ) -> Result<Group, ServiceError> {
        let group = self
            .db
            .as_dao::<GroupDao>()
            .pause(group_id, reason)
            .await?;
        self.notifier.notify(Notification::GroupPaused {
            group_id: group.id.clone(),
            reason,
        });
        Ok(group)
    }

    /// Admin `RetryGroup`: a paused group goes back to Active and its
    /// schedule is normalized forward past any missed dates.
    pub async fn retry_group(&self, group_id: &str) -> Result<Group, ServiceError> {
        let group_id = group_id.to_string();
        let max_job_attempts = self.config.queue.max_job_attempts;
        let today = Utc::now().naive_utc().date();

        let group = self
            .db
            .with_transaction(move |conn| {
                let mut group = dao::get_group(conn, &group_id)?
                    .ok_or_else(|| ServiceError::GroupNotFound(group_id.clone()))?;
                if group.status != GroupStatus::Paused {
                    return Err(ServiceError::NotPaused(group_id));
                }
                dao::resume_group(conn, &mut group)?;
                scheduler::normalize(conn, &mut group, today, max_job_attempts)?;
                Ok(group)
            })
            .await?;

        log::info!("Group [{}] resumed", group.id);
        self.wakeup.notify();
        Ok(group)
    }

    pub async fn group(&self, group_id: &str) -> Result<Group, ServiceError> {
        self.db
            .as_dao::<GroupDao>()
            .get(group_id)
            .await?
            .ok_or_else(|| ServiceError::GroupNotFound(group_id.to_string()))
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, ServiceError> {
        Ok(self.db.as_dao::<GroupDao>().list().await?)
    }

    pub async fn group_payments(&self, group_id: &str) -> Result<Vec<Payment>, ServiceError> {
        self.group(group_id).await?;
        Ok(self.db.as_dao::<PaymentDao>().for_group(group_id).await?)
    }

    pub async fn group_payouts(&self, group_id: &str) -> Result<Vec<Payout>, ServiceError> {
        self.group(group_id).await?;
        Ok(self.db.as_dao::<PayoutDao>().for_group(group_id).await?)
    }

    /// Operator forensics: the last `limit` log entries for a group.
    pub async fn group_log(
        &self,
        group_id: &str,
        limit: i64,
    ) -> Result<Vec<JobLogEntry>, ServiceError> {
        self.group(group_id).await?;
        Ok(self
            .db
            .as_dao::<JobLogDao>()
            .for_group(group_id, limit)
            .await?)
    }

    /// Queue occupancy per state, for dashboards and `ctl`.
    pub async fn queue_stats(&self) -> Result<QueueStats, ServiceError> {
        let dao = self.db.as_dao::<JobQueueDao>();
        Ok(QueueStats {
            pending: dao.in_state(JobState::Pending).await?.len(),
            active: dao.in_state(JobState::Active).await?.len(),
            completed: dao.in_state(JobState::Completed).await?.len(),
            dead: dao.in_state(JobState::Dead).await?.len(),
        })
    }

    /// Webhook entry point; notifications fire after the transaction
    /// committed, never from inside it.
    pub async fn ingest_webhook(&self, event: GatewayEvent) -> Result<IngestOutcome, ServiceError> {
        let outcome = self.ingestor.ingest(event).await?;
        self.dispatch_outcome(&outcome);
        Ok(outcome)
    }

    pub async fn replay_webhook(&self, event_id: &str) -> Result<IngestOutcome, ServiceError> {
        let outcome = self
            .ingestor
            .replay(event_id)
            .await?
            .ok_or_else(|| ServiceError::EventNotFound(event_id.to_string()))?;
        self.dispatch_outcome(&outcome);
        Ok(outcome)
    }

    fn dispatch_outcome(&self, outcome: &IngestOutcome) {
        for notification in &outcome.notifications {
            self.notifier.notify(notification.clone());
        }
        // Finalization may have enqueued the next tick or a retry.
        self.wakeup.notify();
    }
}
