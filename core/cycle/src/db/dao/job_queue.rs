use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use tanda_persistence::{do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::{JobState, ScheduledJob};
use crate::db::schema::scheduled_job::dsl;
use crate::db::DbResult;

/// Cap for the exponential redelivery backoff.
const MAX_REDELIVERY_BACKOFF_SECS: i64 = 600;

pub struct JobQueueDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for JobQueueDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> JobQueueDao<'c> {
    /// Inserts a job under its client-chosen id. Returns false when the id
    /// already exists, which collapses exact duplicates and nothing else.
    pub async fn enqueue(&self, job: ScheduledJob) -> DbResult<bool> {
        do_with_transaction(self.pool, move |conn| enqueue_job(conn, &job)).await
    }

    /// Claims the next due job: either Pending and past `not_before_ts`, or
    /// Active with an expired lease (stalled worker). The claim is a guarded
    /// update on `(state, attempt)`, so two pollers racing on the same row
    /// agree on a single winner.
    pub async fn take_next(&self, lease: Duration) -> DbResult<Option<ScheduledJob>> {
        do_with_transaction(self.pool, move |conn| {
            let now = Utc::now().naive_utc();
            let candidates = dsl::scheduled_job
                .filter(
                    dsl::state
                        .eq(JobState::Pending)
                        .and(dsl::not_before_ts.le(now))
                        .or(dsl::state
                            .eq(JobState::Active)
                            .and(dsl::lease_expires_ts.lt(now))),
                )
                .order_by(dsl::not_before_ts.asc())
                .limit(5)
                .load::<ScheduledJob>(conn)?;

            for job in candidates {
                let claimed = diesel::update(
                    dsl::scheduled_job
                        .filter(dsl::id.eq(&job.id))
                        .filter(dsl::state.eq(job.state))
                        .filter(dsl::attempt.eq(job.attempt)),
                )
                .set((
                    dsl::state.eq(JobState::Active),
                    dsl::lease_expires_ts.eq(now + lease),
                    dsl::attempt.eq(job.attempt + 1),
                ))
                .execute(conn)?;

                if claimed == 1 {
                    let job = dsl::scheduled_job
                        .filter(dsl::id.eq(&job.id))
                        .first::<ScheduledJob>(conn)?;
                    return Ok(Some(job));
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn complete(&self, job_id: &str) -> DbResult<()> {
        let job_id = job_id.to_string();
        do_with_transaction(self.pool, move |conn| {
            diesel::update(dsl::scheduled_job.filter(dsl::id.eq(&job_id)))
                .set((
                    dsl::state.eq(JobState::Completed),
                    dsl::lease_expires_ts.eq(None::<chrono::NaiveDateTime>),
                    dsl::finished_ts.eq(Some(Utc::now().naive_utc())),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Records a failed attempt. Below `max_attempts` the job goes back to
    /// Pending with exponential backoff; at the limit it is dead-lettered.
    pub async fn fail(&self, job_id: &str, error: &str) -> DbResult<JobState> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        do_with_transaction(self.pool, move |conn| {
            let job = dsl::scheduled_job
                .filter(dsl::id.eq(&job_id))
                .first::<ScheduledJob>(conn)?;

            let now = Utc::now().naive_utc();
            let next_state = if job.attempt >= job.max_attempts {
                JobState::Dead
            } else {
                JobState::Pending
            };

            match next_state {
                JobState::Dead => {
                    diesel::update(dsl::scheduled_job.filter(dsl::id.eq(&job_id)))
                        .set((
                            dsl::state.eq(JobState::Dead),
                            dsl::lease_expires_ts.eq(None::<chrono::NaiveDateTime>),
                            dsl::last_error.eq(Some(error.as_str())),
                            dsl::finished_ts.eq(Some(now)),
                        ))
                        .execute(conn)?;
                }
                _ => {
                    let shift = ((job.attempt.max(1) - 1).min(5)) as u32;
                    let backoff_secs = (30i64 << shift).min(MAX_REDELIVERY_BACKOFF_SECS);
                    diesel::update(dsl::scheduled_job.filter(dsl::id.eq(&job_id)))
                        .set((
                            dsl::state.eq(JobState::Pending),
                            dsl::lease_expires_ts.eq(None::<chrono::NaiveDateTime>),
                            dsl::last_error.eq(Some(error.as_str())),
                            dsl::not_before_ts.eq(now + Duration::seconds(backoff_secs)),
                        ))
                        .execute(conn)?;
                }
            }
            Ok(next_state)
        })
        .await
    }

    /// Immediate dead-letter for jobs that must not be redelivered:
    /// undecodable payloads and invariant violations.
    pub async fn dead(&self, job_id: &str, error: &str) -> DbResult<()> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        do_with_transaction(self.pool, move |conn| {
            diesel::update(dsl::scheduled_job.filter(dsl::id.eq(&job_id)))
                .set((
                    dsl::state.eq(JobState::Dead),
                    dsl::lease_expires_ts.eq(None::<chrono::NaiveDateTime>),
                    dsl::last_error.eq(Some(error.as_str())),
                    dsl::finished_ts.eq(Some(Utc::now().naive_utc())),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, job_id: &str) -> DbResult<Option<ScheduledJob>> {
        let job_id = job_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::scheduled_job
                .filter(dsl::id.eq(&job_id))
                .first::<ScheduledJob>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn for_group(&self, group_id: &str) -> DbResult<Vec<ScheduledJob>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::scheduled_job
                .filter(dsl::group_id.eq(&group_id))
                .order_by(dsl::created_ts.asc())
                .load::<ScheduledJob>(conn)?)
        })
        .await
    }

    pub async fn in_state(&self, state: JobState) -> DbResult<Vec<ScheduledJob>> {
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::scheduled_job
                .filter(dsl::state.eq(state))
                .order_by(dsl::not_before_ts.asc())
                .load::<ScheduledJob>(conn)?)
        })
        .await
    }

    /// Audit retention: completed jobs are kept briefly, dead-lettered ones
    /// long enough for operator forensics.
    pub async fn clean(
        &self,
        completed_retention: Duration,
        dead_retention: Duration,
    ) -> DbResult<()> {
        log::trace!("Clean job queue: start");
        let num_deleted = do_with_transaction(self.pool, move |conn| {
            let now = Utc::now().naive_utc();
            let completed = diesel::delete(
                dsl::scheduled_job
                    .filter(dsl::state.eq(JobState::Completed))
                    .filter(dsl::finished_ts.lt(now - completed_retention)),
            )
            .execute(conn)?;
            let dead = diesel::delete(
                dsl::scheduled_job
                    .filter(dsl::state.eq(JobState::Dead))
                    .filter(dsl::finished_ts.lt(now - dead_retention)),
            )
            .execute(conn)?;
            crate::db::DbResult::Ok(completed + dead)
        })
        .await?;
        if num_deleted > 0 {
            log::info!("Clean job queue: {} jobs cleaned", num_deleted);
        }
        log::trace!("Clean job queue: done");
        Ok(())
    }
}

pub(crate) fn enqueue_job(conn: &ConnType, job: &ScheduledJob) -> DbResult<bool> {
    match diesel::insert_into(dsl::scheduled_job)
        .values(job)
        .execute(conn)
    {
        Ok(_) => Ok(true),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
