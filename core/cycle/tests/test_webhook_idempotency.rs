mod common;

use common::Harness;

use tanda_cycle::db::dao::{JobQueueDao, PayoutDao, WebhookEventDao};
use tanda_cycle::db::model::{GroupStatus, JobKind, PaymentStatus, PayoutStatus};
use tanda_cycle::webhook::IngestEffect;

/// The same confirmation delivered five times is indistinguishable from a
/// single delivery: no payout yet while a sibling debit is pending, no
/// counter drift.
#[actix_rt::test]
async fn repeated_success_delivery_converges() {
    let h = Harness::new();
    let (group, members) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let payment = h
        .payments(&group.id, 1)
        .await
        .into_iter()
        .find(|p| p.member_id == members[1].id)
        .unwrap();
    let intent = payment.gateway_intent_id.clone().unwrap();

    let event = h.gateway.succeed_intent(&intent);
    for _ in 0..5 {
        h.deliver(event.clone()).await;
    }

    let payment = h
        .payments(&group.id, 1)
        .await
        .into_iter()
        .find(|p| p.id == payment.id)
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Successful);
    assert_eq!(payment.retry_count, 0);

    // The other debit is still pending: no payout may exist.
    assert!(h
        .db
        .as_dao::<PayoutDao>()
        .get_by_cycle(&group.id, 1)
        .await
        .unwrap()
        .is_none());

    let group = h.group(&group.id).await;
    assert_eq!(group.total_success.0, tanda_cycle::testing::amount("100"));
}

/// Failure events are status-guarded too: redelivery must not inflate the
/// retry counter or schedule extra retry jobs.
#[actix_rt::test]
async fn repeated_failure_delivery_does_not_inflate_retries() {
    let h = Harness::new();
    let (group, members) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let payment = h
        .payments(&group.id, 1)
        .await
        .into_iter()
        .find(|p| p.member_id == members[1].id)
        .unwrap();
    let intent = payment.gateway_intent_id.clone().unwrap();

    let event = h.gateway.fail_intent(&intent, "insufficient funds");
    let first = h.deliver(event.clone()).await;
    assert!(matches!(
        first.effect,
        IngestEffect::PaymentFailed {
            retry_scheduled: true,
            group_paused: false,
            ..
        }
    ));

    for _ in 0..4 {
        let outcome = h.deliver(event.clone()).await;
        assert!(matches!(outcome.effect, IngestEffect::NoOp(_)));
    }

    let payment = h
        .payments(&group.id, 1)
        .await
        .into_iter()
        .find(|p| p.id == payment.id)
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.retry_count, 1);
    assert_eq!(h.group(&group.id).await.status, GroupStatus::Active);

    let retry_jobs = h
        .db
        .as_dao::<JobQueueDao>()
        .for_group(&group.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.kind == JobKind::RetryPayment)
        .count();
    assert_eq!(retry_jobs, 1);
}

/// Any order of one cycle's confirmations, with duplicates sprinkled in,
/// ends in the same final state.
#[actix_rt::test]
async fn delivery_order_does_not_matter() {
    for order in &[[0usize, 1], [1, 0]] {
        let h = Harness::new();
        let (group, _) = h.started_group(3).await;
        h.cycle.process_tick(&group.id).await.unwrap();

        let payments = h.payments(&group.id, 1).await;
        let events: Vec<_> = payments
            .iter()
            .map(|p| h.gateway.succeed_intent(p.gateway_intent_id.as_deref().unwrap()))
            .collect();

        // Deliver in the permuted order, duplicating the first delivery.
        h.deliver(events[order[0]].clone()).await;
        h.deliver(events[order[0]].clone()).await;
        h.deliver(events[order[1]].clone()).await;
        h.deliver(events[order[1]].clone()).await;

        let payout = h
            .db
            .as_dao::<PayoutDao>()
            .get_by_cycle(&group.id, 1)
            .await
            .unwrap()
            .expect("cycle finalized");
        assert_eq!(payout.status, PayoutStatus::Completed);
        assert_eq!(payout.amount.0, tanda_cycle::testing::amount("200"));

        let group = h.group(&group.id).await;
        assert_eq!(group.future_cycle_dates().len(), 2);
        assert_eq!(group.total_success.0, tanda_cycle::testing::amount("200"));
    }
}

/// Unknown event kinds are acknowledged and stored, with no cycle effect.
#[actix_rt::test]
async fn unknown_events_are_recorded_noops() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;

    let raw = r#"{
        "eventId": "evt_mystery",
        "kind": "radar_early_fraud_warning",
        "createdAt": "2025-01-06T00:00:00Z"
    }"#;
    let event: tanda_gateway::GatewayEvent = serde_json::from_str(raw).unwrap();
    let outcome = h.deliver(event).await;
    assert!(matches!(outcome.effect, IngestEffect::NoOp(_)));

    let stored = h
        .db
        .as_dao::<WebhookEventDao>()
        .get("evt_mystery")
        .await
        .unwrap()
        .expect("envelope stored for audit");
    assert!(stored.applied);
    assert!(h.payments(&group.id, 1).await.is_empty());
}

/// Operator replay re-applies a stored envelope; status guards make it a
/// no-op when the transition already happened.
#[actix_rt::test]
async fn replay_is_idempotent() {
    let h = Harness::new();
    let (group, _) = h.started_group(3).await;
    h.cycle.process_tick(&group.id).await.unwrap();

    let payments = h.payments(&group.id, 1).await;
    let event = h
        .gateway
        .succeed_intent(payments[0].gateway_intent_id.as_deref().unwrap());
    h.deliver(event.clone()).await;

    let replayed = h
        .service
        .replay_webhook(&event.event_id)
        .await
        .unwrap();
    assert!(matches!(
        replayed.effect,
        IngestEffect::PaymentConfirmed {
            cycle_completed: false,
            ..
        }
    ));

    // Replaying an unknown event id is a 404-level error.
    let err = h.service.replay_webhook("evt_unknown").await.unwrap_err();
    assert!(matches!(err, tanda_cycle::ServiceError::EventNotFound(_)));
}
