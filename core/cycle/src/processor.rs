pub mod cycle;
pub mod pause;
pub mod retry;

use tanda_gateway::GatewayError;

use crate::db::dao::{GroupDaoError, PaymentDaoError, PayoutDaoError};
use crate::db::DbError;
use crate::scheduler::SchedulerError;
use crate::webhook::FinalizeError;

pub use cycle::{CycleProcessor, TickEffect, TickOutcome};
pub use pause::PauseProcessor;
pub use retry::{RetryEffect, RetryOutcome, RetryProcessor};

#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    /// Unrecoverable data inconsistency. The transaction is rolled back,
    /// the job is failed for good and an operator has to look.
    #[error("Invariant violation for group [{group_id}] cycle {cycle_number}: {message}")]
    InvariantViolation {
        group_id: String,
        cycle_number: i32,
        message: String,
    },
    /// Transient gateway trouble that survived in-place retries; the
    /// transaction rolls back and the queue redelivers.
    #[error("Gateway unavailable: {0}")]
    Gateway(GatewayError),
    #[error(transparent)]
    Group(#[from] GroupDaoError),
    #[error(transparent)]
    Payment(#[from] PaymentDaoError),
    #[error(transparent)]
    Payout(#[from] PayoutDaoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("Database error: {0}")]
    Db(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for ProcessorError {
    fn from(err: ErrorType) -> Self {
        ProcessorError::Db(err.into())
    }
}

impl ProcessorError {
    /// Failures that redelivery cannot fix; the worker dead-letters these
    /// instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProcessorError::InvariantViolation { .. }
                | ProcessorError::Finalize(FinalizeError::Inconsistent { .. })
        )
    }

    /// `(group, cycle, message)` of an invariant breach, for the forensics
    /// log.
    pub fn invariant_details(&self) -> Option<(&str, i32, &str)> {
        match self {
            ProcessorError::InvariantViolation {
                group_id,
                cycle_number,
                message,
            }
            | ProcessorError::Finalize(FinalizeError::Inconsistent {
                group_id,
                cycle_number,
                message,
            }) => Some((group_id, *cycle_number, message)),
            _ => None,
        }
    }

    pub fn invariant(group_id: &str, cycle_number: i32, message: impl Into<String>) -> Self {
        ProcessorError::InvariantViolation {
            group_id: group_id.to_string(),
            cycle_number,
            message: message.into(),
        }
    }
}
