use futures::join;
use tokio::time;

use tanda_persistence::DbExecutor;

use crate::config::{to_chrono, DbConfig};
use crate::db::dao::{JobLogDao, JobQueueDao, WebhookEventDao};

pub async fn clean(db: DbExecutor, cfg: &DbConfig) {
    let jobs_db = db.clone();
    let log_db = db.clone();
    let webhook_db = db.clone();

    let results = join!(
        async move {
            jobs_db
                .as_dao::<JobQueueDao>()
                .clean(
                    to_chrono(cfg.completed_job_retention),
                    to_chrono(cfg.dead_job_retention),
                )
                .await
        },
        async move {
            log_db
                .as_dao::<JobLogDao>()
                .clean(to_chrono(cfg.job_log_retention))
                .await
        },
        async move {
            webhook_db
                .as_dao::<WebhookEventDao>()
                .clean(to_chrono(cfg.webhook_retention))
                .await
        },
    );
    let v_results = vec![results.0, results.1, results.2];
    for db_result in v_results.into_iter() {
        if let Err(e) = db_result {
            log::error!("Database cleaner error: {}", e);
        }
    }
}

pub async fn clean_forever(db: DbExecutor, cfg: DbConfig) {
    let mut interval = time::interval(cfg.cleanup_interval);
    loop {
        interval.tick().await;
        log::debug!("Database cleaner job started");
        let db = db.clone();
        clean(db, &cfg).await;
        log::debug!("Database cleaner job done");
    }
}
