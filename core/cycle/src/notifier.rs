//! Fire-and-forget notifications. Delivery failures are the implementation's
//! problem to swallow and log; state advancement never waits on them.

use crate::db::model::PauseReason;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    CycleStarted {
        group_id: String,
        cycle_number: i32,
    },
    PayoutSent {
        group_id: String,
        member_id: String,
        cycle_number: i32,
    },
    PaymentFailed {
        group_id: String,
        member_id: String,
        cycle_number: i32,
        retry_count: i32,
    },
    GroupPaused {
        group_id: String,
        reason: PauseReason,
    },
    GroupEnded {
        group_id: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default sink; the real mailer lives in an external service.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        log::info!("Notification: {:?}", notification);
    }
}
