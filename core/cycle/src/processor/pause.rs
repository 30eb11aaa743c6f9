//! Queued group pause, used by account-status webhooks. In-flight debits
//! are left to resolve; only the start of the next cycle is refused.

use tanda_persistence::DbExecutor;

use crate::db::dao;
use crate::db::model::{GroupStatus, PauseReason};
use crate::notifier::Notification;
use crate::processor::ProcessorError;

#[derive(Clone)]
pub struct PauseProcessor {
    db: DbExecutor,
}

impl PauseProcessor {
    pub fn new(db: DbExecutor) -> PauseProcessor {
        PauseProcessor { db }
    }

    pub async fn process(
        &self,
        group_id: &str,
        reason: PauseReason,
    ) -> Result<Vec<Notification>, ProcessorError> {
        let group_id = group_id.to_string();
        self.db
            .with_transaction(move |conn| {
                let mut group = match dao::get_group(conn, &group_id)? {
                    Some(group) => group,
                    None => return Ok(vec![]),
                };
                if group.status != GroupStatus::Active {
                    log::debug!(
                        "Pause job for group [{}] skipped: group is {}",
                        group_id,
                        group.status
                    );
                    return Ok(vec![]);
                }
                dao::pause_group(conn, &mut group, reason)?;
                metrics::counter!("tanda.groups.paused", 1);
                Ok(vec![Notification::GroupPaused { group_id, reason }])
            })
            .await
    }
}
