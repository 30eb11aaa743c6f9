mod common;

use bigdecimal::BigDecimal;
use proptest::prelude::*;
use std::str::FromStr;

use tanda_cycle::db::model::CycleFrequency;
use tanda_cycle::fees::{to_cents, FeePolicy};
use tanda_cycle::scheduler::{build_schedule, next_date};

fn policy() -> FeePolicy {
    FeePolicy {
        percent: BigDecimal::from_str("0.01").unwrap(),
        fixed: BigDecimal::from_str("0.30").unwrap(),
        cap: BigDecimal::from_str("3.50").unwrap(),
        retry_surcharge: BigDecimal::from_str("2.50").unwrap(),
    }
}

fn cents_amount() -> impl Strategy<Value = BigDecimal> {
    // Amounts with cent precision up to one million.
    (1i64..=100_000_000).prop_map(|cents| BigDecimal::from(cents) / BigDecimal::from(100))
}

fn frequency() -> impl Strategy<Value = CycleFrequency> {
    prop_oneof![
        Just(CycleFrequency::Daily),
        Just(CycleFrequency::Weekly),
        Just(CycleFrequency::BiWeekly),
        Just(CycleFrequency::Monthly),
    ]
}

proptest! {
    /// First-attempt fees never exceed the cap; retried fees never exceed
    /// cap + surcharge, and the surcharge is flat across retry counts.
    #[test]
    fn fee_respects_cap_and_flat_surcharge(amount in cents_amount(), retries in 1i32..10) {
        let p = policy();
        let first = p.application_fee(&amount, 0);
        let retried = p.application_fee(&amount, retries);

        prop_assert!(first <= p.cap);
        prop_assert!(first > BigDecimal::from(0));
        prop_assert_eq!(retried.clone(), first + p.retry_surcharge.clone());
        prop_assert_eq!(retried, p.application_fee(&amount, 1));
    }

    /// Cent-precision amounts convert to cents exactly.
    #[test]
    fn cents_round_trip(cents in 0i64..=10_000_000_000) {
        let amount = BigDecimal::from(cents) / BigDecimal::from(100);
        prop_assert_eq!(to_cents(&amount), Some(cents));
    }

    /// Schedules are exactly `count` long and strictly increasing for every
    /// frequency, including month-length clamping.
    #[test]
    fn schedules_are_strictly_increasing(
        freq in frequency(),
        count in 1usize..=24,
        year in 2024i32..=2030,
        month in 1u32..=12,
        day in 1u32..=28,
    ) {
        let start = chrono::NaiveDate::from_ymd(year, month, day);
        let schedule = build_schedule(start, freq, count);
        prop_assert_eq!(schedule.len(), count);
        prop_assert_eq!(schedule[0], start);
        prop_assert!(schedule.windows(2).all(|w| w[0] < w[1]));
    }

    /// The month step never skips a month and never invents day 31 in a
    /// short month.
    #[test]
    fn monthly_step_is_always_valid(
        year in 2024i32..=2030,
        month in 1u32..=12,
        day in 1u32..=31,
    ) {
        prop_assume!(chrono::NaiveDate::from_ymd_opt(year, month, day).is_some());
        let start = chrono::NaiveDate::from_ymd(year, month, day);
        let next = next_date(CycleFrequency::Monthly, start);
        prop_assert!(next > start);
        let expected_month = if month == 12 { 1 } else { month + 1 };
        prop_assert_eq!(chrono::Datelike::month(&next), expected_month);
    }
}

mod db_properties {
    use crate::common::Harness;
    use tanda_cycle::db::model::PaymentStatus;
    use tanda_cycle::testing::amount;
    use tanda_dummy_gateway::Outcome;

    /// `has_been_paid` never flips back, even if finalization re-runs.
    #[actix_rt::test]
    async fn has_been_paid_is_monotonic() {
        let h = Harness::new();
        let (group, members) = h.started_group(3).await;
        h.cycle.process_tick(&group.id).await.unwrap();
        h.confirm_cycle(&group.id, 1).await;

        let paid_before: Vec<bool> = member_paid_flags(&h, &group.id).await;
        assert_eq!(paid_before, vec![true, false, false]);

        // Replaying the cycle's confirmations must not disturb the flags.
        for payment in h.payments(&group.id, 1).await {
            let event = h
                .gateway
                .succeed_intent(payment.gateway_intent_id.as_deref().unwrap());
            h.deliver(event).await;
        }
        assert_eq!(member_paid_flags(&h, &group.id).await, paid_before);
        let _ = members;
    }

    /// totalDebited counts Pending + Successful, never Failed, and
    /// totalSuccess never exceeds it.
    #[actix_rt::test]
    async fn aggregates_follow_payment_statuses() {
        let h = Harness::new();
        let (group, members) = h.started_group(4).await;

        // One debtor fails permanently, one succeeds, one stays pending.
        h.gateway.script(
            members[3].account_ref.as_deref().unwrap(),
            Outcome::RefusePermanent("blocked".into()),
        );
        h.cycle.process_tick(&group.id).await.unwrap();

        let succeeded = h
            .payments(&group.id, 1)
            .await
            .into_iter()
            .find(|p| p.member_id == members[1].id)
            .unwrap();
        let event = h
            .gateway
            .succeed_intent(succeeded.gateway_intent_id.as_deref().unwrap());
        h.deliver(event).await;

        let group = h.group(&group.id).await;
        // Failed payment excluded; one successful + one pending remain.
        assert_eq!(group.total_debited.0, amount("200"));
        assert_eq!(group.total_success.0, amount("100"));
        assert_eq!(group.total_pending.0, amount("100"));
        assert!(group.total_success.0 <= group.total_debited.0);

        let statuses: Vec<PaymentStatus> = h
            .payments(&group.id, 1)
            .await
            .into_iter()
            .map(|p| p.status)
            .collect();
        assert!(statuses.contains(&PaymentStatus::Failed));
    }

    async fn member_paid_flags(h: &Harness, group_id: &str) -> Vec<bool> {
        use tanda_cycle::db::dao::MemberDao;
        h.db.as_dao::<MemberDao>()
            .list(group_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.has_been_paid)
            .collect()
    }
}
