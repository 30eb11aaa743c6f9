mod common;

use std::time::Duration;

use common::Harness;
use tanda_cycle::db::dao::JobQueueDao;
use tanda_cycle::db::model::{JobKind, JobState};

/// End-to-end through the worker pool: starting a group enqueues a due
/// tick, a worker claims it, the processor opens the debits and the job
/// completes.
#[actix_rt::test]
async fn workers_pick_up_and_complete_due_ticks() {
    let h = Harness::new();
    h.service.spawn_background();

    let (group, _) = h.started_group(3).await;

    let deadline = 100;
    let mut payments = vec![];
    for _ in 0..deadline {
        payments = h.payments(&group.id, 1).await;
        if payments.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(payments.len(), 2, "worker never processed the tick");

    // The tick job ends Completed, not redelivered.
    let mut done = false;
    for _ in 0..deadline {
        let jobs = h
            .db
            .as_dao::<JobQueueDao>()
            .for_group(&group.id)
            .await
            .unwrap();
        done = jobs
            .iter()
            .any(|j| j.kind == JobKind::CycleTick && j.state == JobState::Completed);
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(done, "tick job never completed");
}
