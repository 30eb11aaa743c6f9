use chrono::{Duration, Utc};

use tanda_cycle::db::dao::JobQueueDao;
use tanda_cycle::db::model::{JobKind, JobState, ScheduledJob};
use tanda_cycle::testing::init_test_db;

fn tick_job(group_id: &str, delay_secs: i64) -> ScheduledJob {
    ScheduledJob::cycle_tick(
        group_id,
        Utc::now().naive_utc() + Duration::seconds(delay_secs),
        3,
    )
}

#[actix_rt::test]
async fn client_chosen_ids_collapse_exact_duplicates_only() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    let job = tick_job("g1", 0);
    assert!(dao.enqueue(job.clone()).await.unwrap());
    // Same id again: collapsed.
    assert!(!dao.enqueue(job.clone()).await.unwrap());
    // A distinct occurrence (different timestamp suffix) is kept.
    let mut other = tick_job("g1", 0);
    other.id = format!("{}-bis", job.id);
    assert!(dao.enqueue(other).await.unwrap());
}

#[actix_rt::test]
async fn delayed_jobs_are_invisible_until_due() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    dao.enqueue(tick_job("g1", 3600)).await.unwrap();
    assert!(dao.take_next(Duration::minutes(2)).await.unwrap().is_none());

    dao.enqueue(tick_job("g2", -1)).await.unwrap();
    let job = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .expect("due job claimed");
    assert_eq!(job.group_id.as_deref(), Some("g2"));
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempt, 1);
    assert!(job.lease_expires_ts.is_some());

    // While leased, nobody else can claim it.
    assert!(dao.take_next(Duration::minutes(2)).await.unwrap().is_none());
}

#[actix_rt::test]
async fn expired_lease_means_redelivery() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    dao.enqueue(tick_job("g1", -1)).await.unwrap();
    // Claim with an already-expired lease: a stalled worker.
    let first = dao
        .take_next(Duration::seconds(-1))
        .await
        .unwrap()
        .expect("claimed");
    assert_eq!(first.attempt, 1);

    let second = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .expect("stalled job redelivered");
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, 2);
}

#[actix_rt::test]
async fn failed_jobs_back_off_before_redelivery() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    dao.enqueue(tick_job("g1", -1)).await.unwrap();
    let claimed = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();

    let state = dao.fail(&claimed.id, "gateway down").await.unwrap();
    assert_eq!(state, JobState::Pending);

    let stored = dao.get(&claimed.id).await.unwrap().unwrap();
    assert!(stored.not_before_ts > Utc::now().naive_utc());
    assert_eq!(stored.last_error.as_deref(), Some("gateway down"));
    // Backed off: not claimable right now.
    assert!(dao.take_next(Duration::minutes(2)).await.unwrap().is_none());
}

#[actix_rt::test]
async fn exhausted_jobs_are_dead_lettered_and_cleaned() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    let mut job = tick_job("g1", -1);
    job.max_attempts = 1;
    dao.enqueue(job).await.unwrap();

    let claimed = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();
    let state = dao.fail(&claimed.id, "gateway still down").await.unwrap();
    assert_eq!(state, JobState::Dead);
    let dead = dao.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert!(dead.finished_ts.is_some());

    // Dead jobs are cleaned only after the audit retention.
    dao.clean(Duration::hours(24), Duration::days(7)).await.unwrap();
    assert!(dao.get(&claimed.id).await.unwrap().is_some());
    dao.clean(Duration::hours(24), Duration::seconds(-1))
        .await
        .unwrap();
    assert!(dao.get(&claimed.id).await.unwrap().is_none());
}

#[actix_rt::test]
async fn completed_jobs_are_retained_then_cleaned() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    dao.enqueue(tick_job("g1", -1)).await.unwrap();
    let job = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();
    dao.complete(&job.id).await.unwrap();

    let stored = dao.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);

    dao.clean(Duration::hours(24), Duration::days(7)).await.unwrap();
    assert!(dao.get(&job.id).await.unwrap().is_some());
    dao.clean(Duration::seconds(-1), Duration::days(7))
        .await
        .unwrap();
    assert!(dao.get(&job.id).await.unwrap().is_none());
}

#[actix_rt::test]
async fn group_pause_jobs_round_trip_kind_and_payload() {
    let db = init_test_db();
    let dao = db.as_dao::<JobQueueDao>();

    let job = ScheduledJob::group_pause(
        "g1",
        tanda_cycle::db::model::PauseReason::Subscription,
        Utc::now().naive_utc(),
        3,
    );
    dao.enqueue(job).await.unwrap();

    let claimed = dao
        .take_next(Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.kind, JobKind::GroupPause);
    assert!(claimed.to_job().is_ok());
}
