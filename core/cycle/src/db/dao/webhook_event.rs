use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use tanda_persistence::{do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::WebhookEventRow;
use crate::db::schema::webhook_event::dsl;
use crate::db::DbResult;

pub struct WebhookEventDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for WebhookEventDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> WebhookEventDao<'c> {
    pub async fn get(&self, event_id: &str) -> DbResult<Option<WebhookEventRow>> {
        let event_id = event_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::webhook_event
                .filter(dsl::id.eq(&event_id))
                .first::<WebhookEventRow>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn clean(&self, retention: Duration) -> DbResult<()> {
        log::trace!("Clean webhook events: start");
        let num_deleted = do_with_transaction(self.pool, move |conn| {
            let nd = diesel::delete(
                dsl::webhook_event
                    .filter(dsl::applied.eq(true))
                    .filter(dsl::received_ts.lt(Utc::now().naive_utc() - retention)),
            )
            .execute(conn)?;
            crate::db::DbResult::Ok(nd)
        })
        .await?;
        if num_deleted > 0 {
            log::info!("Clean webhook events: {} cleaned", num_deleted);
        }
        log::trace!("Clean webhook events: done");
        Ok(())
    }
}

/// Keeps the first copy of each provider event for audit and replay.
/// Returns false on redelivery. Deliberately NOT the idempotency guard:
/// transitions converge through entity status checks.
pub(crate) fn record_event_if_new(conn: &ConnType, row: &WebhookEventRow) -> DbResult<bool> {
    match diesel::insert_into(dsl::webhook_event)
        .values(row)
        .execute(conn)
    {
        Ok(_) => Ok(true),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn mark_event_applied(conn: &ConnType, event_id: &str) -> DbResult<()> {
    diesel::update(dsl::webhook_event.filter(dsl::id.eq(event_id)))
        .set(dsl::applied.eq(true))
        .execute(conn)?;
    Ok(())
}
