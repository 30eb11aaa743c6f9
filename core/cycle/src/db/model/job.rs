use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::sql_types::Integer;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::db::model::{GroupId, PauseReason};
use crate::db::schema::{job_log, scheduled_job};

#[derive(
    FromPrimitive,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Clone,
    Copy,
    derive_more::Display,
    Serialize,
    Deserialize,
)]
#[sql_type = "Integer"]
pub enum JobKind {
    CycleTick = 0,
    RetryPayment = 1,
    GroupPause = 2,
}

db_int_enum!(JobKind);

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CycleTick => "cycle-tick",
            JobKind::RetryPayment => "retry-payment",
            JobKind::GroupPause => "group-pause",
        }
    }
}

#[derive(
    FromPrimitive,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
    derive_more::Display,
    Serialize,
    Deserialize,
)]
#[sql_type = "Integer"]
pub enum JobState {
    /// Waiting for `not_before_ts`.
    Pending = 0,
    /// Claimed by a worker; redelivered if the lease expires.
    Active = 1,
    Completed = 2,
    /// Dead-lettered after exhausting `max_attempts`.
    Dead = 3,
}

db_int_enum!(JobState);

/// Decoded work item, dispatched in a single match at the worker entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    CycleTick { group_id: GroupId },
    RetryPayment { payment_id: String },
    GroupPause { group_id: GroupId, reason: PauseReason },
}

#[derive(thiserror::Error, Debug)]
pub enum JobDecodeError {
    #[error("Job [{0}] is missing its {1} reference")]
    MissingReference(String, &'static str),
    #[error("Job [{0}] carries an unreadable payload: {1}")]
    BadPayload(String, serde_json::Error),
}

#[derive(Clone, Debug, Identifiable, Insertable, Queryable, AsChangeset)]
#[table_name = "scheduled_job"]
pub struct ScheduledJob {
    /// Client-chosen: `<kind>-<primary key>-<epoch millis>`, so distinct
    /// occurrences never collapse while exact duplicates do.
    pub id: String,
    pub kind: JobKind,
    pub group_id: Option<GroupId>,
    pub payment_id: Option<String>,
    pub payload: Option<String>,
    pub state: JobState,
    pub not_before_ts: NaiveDateTime,
    pub lease_expires_ts: Option<NaiveDateTime>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_ts: NaiveDateTime,
    pub finished_ts: Option<NaiveDateTime>,
}

impl ScheduledJob {
    pub fn job_id(kind: JobKind, key: &str, now: DateTime<Utc>) -> String {
        format!("{}-{}-{}", kind.as_str(), key, now.timestamp_millis())
    }

    fn new(
        kind: JobKind,
        key: &str,
        not_before: NaiveDateTime,
        max_attempts: i32,
    ) -> ScheduledJob {
        let now = Utc::now();
        ScheduledJob {
            id: Self::job_id(kind, key, now),
            kind,
            group_id: None,
            payment_id: None,
            payload: None,
            state: JobState::Pending,
            not_before_ts: not_before,
            lease_expires_ts: None,
            attempt: 0,
            max_attempts,
            last_error: None,
            created_ts: now.naive_utc(),
            finished_ts: None,
        }
    }

    pub fn cycle_tick(group_id: &str, not_before: NaiveDateTime, max_attempts: i32) -> ScheduledJob {
        let mut job = Self::new(JobKind::CycleTick, group_id, not_before, max_attempts);
        job.group_id = Some(group_id.to_string());
        job
    }

    pub fn retry_payment(
        payment_id: &str,
        group_id: &str,
        not_before: NaiveDateTime,
        max_attempts: i32,
    ) -> ScheduledJob {
        let mut job = Self::new(JobKind::RetryPayment, payment_id, not_before, max_attempts);
        job.group_id = Some(group_id.to_string());
        job.payment_id = Some(payment_id.to_string());
        job
    }

    pub fn group_pause(
        group_id: &str,
        reason: PauseReason,
        not_before: NaiveDateTime,
        max_attempts: i32,
    ) -> ScheduledJob {
        let mut job = Self::new(JobKind::GroupPause, group_id, not_before, max_attempts);
        job.group_id = Some(group_id.to_string());
        job.payload = Some(serde_json::to_string(&reason).expect("pause reason serializes"));
        job
    }

    pub fn to_job(&self) -> Result<Job, JobDecodeError> {
        let group_id = || {
            self.group_id
                .clone()
                .ok_or_else(|| JobDecodeError::MissingReference(self.id.clone(), "group"))
        };
        match self.kind {
            JobKind::CycleTick => Ok(Job::CycleTick {
                group_id: group_id()?,
            }),
            JobKind::RetryPayment => {
                let payment_id = self.payment_id.clone().ok_or_else(|| {
                    JobDecodeError::MissingReference(self.id.clone(), "payment")
                })?;
                Ok(Job::RetryPayment { payment_id })
            }
            JobKind::GroupPause => {
                let reason = match &self.payload {
                    Some(raw) => serde_json::from_str(raw)
                        .map_err(|e| JobDecodeError::BadPayload(self.id.clone(), e))?,
                    None => PauseReason::Admin,
                };
                Ok(Job::GroupPause {
                    group_id: group_id()?,
                    reason,
                })
            }
        }
    }
}

#[derive(
    FromPrimitive,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
    derive_more::Display,
    Serialize,
    Deserialize,
)]
#[sql_type = "Integer"]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Error = 2,
}

db_int_enum!(Severity);

#[derive(Clone, Debug, Queryable)]
pub struct JobLogEntry {
    pub id: i32,
    pub job_kind: Option<JobKind>,
    pub group_id: Option<GroupId>,
    pub cycle_number: Option<i32>,
    pub severity: Severity,
    pub message: String,
    pub created_ts: NaiveDateTime,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "job_log"]
pub struct NewJobLogEntry {
    pub job_kind: Option<JobKind>,
    pub group_id: Option<GroupId>,
    pub cycle_number: Option<i32>,
    pub severity: Severity,
    pub message: String,
    pub created_ts: NaiveDateTime,
}

impl NewJobLogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> NewJobLogEntry {
        NewJobLogEntry {
            job_kind: None,
            group_id: None,
            cycle_number: None,
            severity,
            message: message.into(),
            created_ts: Utc::now().naive_utc(),
        }
    }

    pub fn for_group(mut self, group_id: &str) -> NewJobLogEntry {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn for_cycle(mut self, cycle_number: i32) -> NewJobLogEntry {
        self.cycle_number = Some(cycle_number);
        self
    }

    pub fn for_kind(mut self, kind: JobKind) -> NewJobLogEntry {
        self.job_kind = Some(kind);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_keep_distinct_occurrences_apart() {
        let t1 = DateTime::parse_from_rfc3339("2025-01-06T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t2 = t1 + chrono::Duration::milliseconds(1);
        let a = ScheduledJob::job_id(JobKind::CycleTick, "g1", t1);
        let b = ScheduledJob::job_id(JobKind::CycleTick, "g1", t2);
        assert_eq!(a, "cycle-tick-g1-1736121600000");
        assert_ne!(a, b);
    }

    #[test]
    fn group_pause_round_trips_its_reason() {
        let job = ScheduledJob::group_pause(
            "g1",
            PauseReason::Subscription,
            Utc::now().naive_utc(),
            5,
        );
        match job.to_job().unwrap() {
            Job::GroupPause { group_id, reason } => {
                assert_eq!(group_id, "g1");
                assert_eq!(reason, PauseReason::Subscription);
            }
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[test]
    fn retry_payment_requires_payment_reference() {
        let mut job = ScheduledJob::retry_payment("p1", "g1", Utc::now().naive_utc(), 5);
        job.payment_id = None;
        assert!(job.to_job().is_err());
    }
}
