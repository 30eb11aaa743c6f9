#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use tanda_cycle::config::Config;
use tanda_cycle::db::dao::PaymentDao;
use tanda_cycle::db::model::{CycleFrequency, Group, Member, PaymentStatus};
use tanda_cycle::notifier::Notifier;
use tanda_cycle::processor::{CycleProcessor, PauseProcessor, RetryProcessor};
use tanda_cycle::rate::RateLimiter;
use tanda_cycle::testing::{create_group, init_test_db, test_config, RecordingNotifier};
use tanda_cycle::webhook::{IngestOutcome, WebhookIngestor};
use tanda_cycle::CycleService;
use tanda_dummy_gateway::DummyGateway;
use tanda_gateway::{GatewayDriver, GatewayEvent};
use tanda_persistence::DbExecutor;

pub const WEBHOOK_SECRET: &[u8] = b"whsec_test";

pub struct Harness {
    pub db: DbExecutor,
    pub gateway: Arc<DummyGateway>,
    pub service: Arc<CycleService>,
    pub notifier: Arc<RecordingNotifier>,
    pub cycle: CycleProcessor,
    pub retry: RetryProcessor,
    pub pause: PauseProcessor,
    pub ingestor: WebhookIngestor,
    pub config: Arc<Config>,
}

impl Harness {
    pub fn new() -> Harness {
        let db = init_test_db();
        let config = test_config();
        let gateway = Arc::new(DummyGateway::new(WEBHOOK_SECRET));
        let notifier = RecordingNotifier::new();

        let gateway_driver: Arc<dyn GatewayDriver> = gateway.clone();
        let recorder: Arc<dyn Notifier> = notifier.clone();
        let service = CycleService::new(&db, gateway_driver, recorder, config.clone())
            .expect("service initializes");

        let limiter = Arc::new(RateLimiter::new(1000));
        let cycle = CycleProcessor::new(
            db.clone(),
            gateway.clone(),
            limiter.clone(),
            config.cycle.clone(),
            config.queue.clone(),
        );
        let retry = RetryProcessor::new(
            db.clone(),
            gateway.clone(),
            limiter,
            config.cycle.clone(),
            config.queue.clone(),
        );
        let pause = PauseProcessor::new(db.clone());
        let ingestor = WebhookIngestor::new(db.clone(), config.cycle.clone(), config.queue.clone());

        Harness {
            db,
            gateway,
            service,
            notifier,
            cycle,
            retry,
            pause,
            ingestor,
            config,
        }
    }

    /// A started weekly 100-per-cycle group, first cycle on 2025-01-06.
    pub async fn started_group(&self, member_count: usize) -> (Group, Vec<Member>) {
        let (group, members) = create_group(
            &self.db,
            "100",
            CycleFrequency::Weekly,
            member_count,
        )
        .await;
        self.service
            .start_cycle(&group.id, first_cycle_date(), CycleFrequency::Weekly)
            .await
            .expect("cycle starts");
        let group = self.service.group(&group.id).await.expect("group reloads");
        (group, members)
    }

    pub async fn deliver(&self, event: GatewayEvent) -> IngestOutcome {
        self.service
            .ingest_webhook(event)
            .await
            .expect("event ingests")
    }

    /// Confirms every pending debit of the cycle through the webhook path.
    pub async fn confirm_cycle(&self, group_id: &str, cycle_number: i32) {
        for payment in self.payments(group_id, cycle_number).await {
            if payment.status == PaymentStatus::Pending {
                let intent = payment
                    .gateway_intent_id
                    .expect("pending payment has an intent");
                let event = self.gateway.succeed_intent(&intent);
                self.deliver(event).await;
            }
        }
    }

    pub async fn payments(
        &self,
        group_id: &str,
        cycle_number: i32,
    ) -> Vec<tanda_cycle::db::model::Payment> {
        self.db
            .as_dao::<PaymentDao>()
            .list(group_id, cycle_number)
            .await
            .expect("payments load")
    }

    pub async fn group(&self, group_id: &str) -> Group {
        self.service.group(group_id).await.expect("group loads")
    }
}

pub fn first_cycle_date() -> NaiveDate {
    NaiveDate::from_ymd(2025, 1, 6)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd(y, m, d)
}
