//! Helpers for orchestrator tests: migrated throwaway databases, group
//! fixtures and a notifier that records instead of sending.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use parking_lot::Mutex;

use tanda_persistence::DbExecutor;

use crate::config::Config;
use crate::db::dao::{GroupDao, MemberDao};
use crate::db::model::{CycleFrequency, Group, Member};
use crate::notifier::{Notification, Notifier};

pub fn init_test_db() -> DbExecutor {
    let db = DbExecutor::in_memory().expect("in-memory database opens");
    db.apply_migration(|conn| crate::db::migrations::run_with_output(conn, &mut std::io::sink()))
        .expect("migrations apply");
    db
}

pub fn test_config() -> Arc<Config> {
    Arc::new(Config::from_env().expect("default config parses"))
}

pub fn amount(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).expect("test amount parses")
}

/// A group with `member_count` active members in payout order 1..N, all
/// with usable mandates.
pub async fn create_group(
    db: &DbExecutor,
    contribution: &str,
    frequency: CycleFrequency,
    member_count: usize,
) -> (Group, Vec<Member>) {
    let group = Group::new("test-circle", amount(contribution), frequency);
    db.as_dao::<GroupDao>()
        .create(group.clone())
        .await
        .expect("group fixture inserts");

    let mut members = Vec::with_capacity(member_count);
    for order in 1..=member_count {
        let member = Member::new(&group.id, &format!("user-{}", order), order as i32);
        db.as_dao::<MemberDao>()
            .create(member.clone())
            .await
            .expect("member fixture inserts");
        members.push(member);
    }
    (group, members)
}

pub async fn insert_member(db: &DbExecutor, member: Member) -> Member {
    db.as_dao::<MemberDao>()
        .create(member.clone())
        .await
        .expect("member fixture inserts");
    member
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<RecordingNotifier> {
        Arc::new(RecordingNotifier::default())
    }

    pub fn recorded(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events.lock().push(notification);
    }
}
