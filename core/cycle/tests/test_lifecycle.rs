mod common;

use common::Harness;

use tanda_cycle::db::dao::{JobQueueDao, MemberDao, PayoutDao};
use tanda_cycle::db::model::{
    CycleFrequency, GroupStatus, Job, JobKind, PauseReason, PayoutStatus,
};
use tanda_cycle::processor::TickEffect;
use tanda_cycle::ServiceError;

/// All three cycles of a three-member group: every member paid exactly
/// once, schedule drains to empty, group parks as Paused/AllPaid.
#[actix_rt::test]
async fn full_group_lifecycle_drains_the_schedule() {
    let h = Harness::new();
    let (group, members) = h.started_group(3).await;

    for cycle in 1..=3 {
        let outcome = h.cycle.process_tick(&group.id).await.unwrap();
        match outcome.effect {
            TickEffect::Ticked {
                cycle_number,
                payments_created,
                ..
            } => {
                assert_eq!(cycle_number, cycle);
                assert_eq!(payments_created, 2);
            }
            other => panic!("cycle {}: unexpected effect {:?}", cycle, other),
        }
        h.confirm_cycle(&group.id, cycle).await;

        // Each completed cycle consumes exactly one scheduled date.
        let remaining = h.group(&group.id).await.future_cycle_dates().len();
        assert_eq!(remaining, 3 - cycle as usize);
    }

    let group = h.group(&group.id).await;
    assert_eq!(group.status, GroupStatus::Paused);
    assert_eq!(group.pause_reason, Some(PauseReason::AllPaid));
    assert!(group.future_cycle_dates().is_empty());
    assert_eq!(group.next_cycle_date, None);

    let payouts = h
        .db
        .as_dao::<PayoutDao>()
        .for_group(&group.id)
        .await
        .unwrap();
    assert_eq!(payouts.len(), 3);
    assert!(payouts.iter().all(|p| p.status == PayoutStatus::Completed));

    // Payees rotate in payout order; every member was paid exactly once.
    let payees: Vec<&str> = payouts.iter().map(|p| p.member_id.as_str()).collect();
    assert_eq!(
        payees,
        members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
    );
    for member in h.db.as_dao::<MemberDao>().list(&group.id).await.unwrap() {
        assert!(member.has_been_paid);
    }
}

#[actix_rt::test]
async fn admin_surface_maps_state_errors() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;

    // Start twice: AlreadyStarted.
    let err = h
        .service
        .start_cycle(&group.id, common::first_cycle_date(), CycleFrequency::Weekly)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyStarted(_)));

    // Retry while active: NotPaused.
    let err = h.service.retry_group(&group.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotPaused(_)));

    // Unknown group: not found.
    let err = h.service.group("no-such-group").await.unwrap_err();
    assert!(matches!(err, ServiceError::GroupNotFound(_)));

    // Pause then resume restores Active with a clean pause reason.
    h.service
        .pause_group(&group.id, PauseReason::Admin)
        .await
        .unwrap();
    assert_eq!(h.group(&group.id).await.status, GroupStatus::Paused);
    h.service.retry_group(&group.id).await.unwrap();
    let group = h.group(&group.id).await;
    assert_eq!(group.status, GroupStatus::Active);
    assert_eq!(group.pause_reason, None);
}

/// Upstream account suspension: the webhook queues a group-pause job, and
/// processing it pauses the group with the Subscription reason while
/// in-flight debits keep resolving.
#[actix_rt::test]
async fn account_suspension_pauses_through_the_queue() {
    let h = Harness::new();
    let (group, members) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let event = h
        .gateway
        .suspend_account(members[1].account_ref.as_deref().unwrap());
    h.deliver(event).await;

    let jobs = h
        .db
        .as_dao::<JobQueueDao>()
        .for_group(&group.id)
        .await
        .unwrap();
    let pause_job = jobs
        .iter()
        .find(|j| j.kind == JobKind::GroupPause)
        .expect("pause job enqueued");
    match pause_job.to_job().unwrap() {
        Job::GroupPause { group_id, reason } => {
            assert_eq!(group_id, group.id);
            assert_eq!(reason, PauseReason::Subscription);
        }
        other => panic!("unexpected job: {:?}", other),
    }

    let notifications = h.pause.process(&group.id, PauseReason::Subscription).await.unwrap();
    assert_eq!(notifications.len(), 1);

    let paused = h.group(&group.id).await;
    assert_eq!(paused.status, GroupStatus::Paused);
    assert_eq!(paused.pause_reason, Some(PauseReason::Subscription));

    // In-flight debits still resolve; the next cycle simply refuses to run.
    h.confirm_cycle(&group.id, 1).await;
    let payout = h
        .db
        .as_dao::<PayoutDao>()
        .get_by_cycle(&group.id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);

    let outcome = h.cycle.process_tick(&group.id).await.unwrap();
    assert!(matches!(outcome.effect, TickEffect::Skipped(_)));
}
