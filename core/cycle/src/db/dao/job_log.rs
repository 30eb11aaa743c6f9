use chrono::{Duration, Utc};
use diesel::prelude::*;

use tanda_persistence::{do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::{JobLogEntry, NewJobLogEntry};
use crate::db::schema::job_log::dsl;
use crate::db::DbResult;

/// Operator forensics log (`ScheduledJobLog` in the product glossary).
pub struct JobLogDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for JobLogDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> JobLogDao<'c> {
    pub async fn append(&self, entry: NewJobLogEntry) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| append_log(conn, &entry)).await
    }

    pub async fn for_group(&self, group_id: &str, limit: i64) -> DbResult<Vec<JobLogEntry>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::job_log
                .filter(dsl::group_id.eq(&group_id))
                .order_by(dsl::created_ts.desc())
                .limit(limit)
                .load::<JobLogEntry>(conn)?)
        })
        .await
    }

    pub async fn clean(&self, retention: Duration) -> DbResult<()> {
        log::trace!("Clean job log: start");
        let num_deleted = do_with_transaction(self.pool, move |conn| {
            let nd = diesel::delete(
                dsl::job_log.filter(dsl::created_ts.lt(Utc::now().naive_utc() - retention)),
            )
            .execute(conn)?;
            crate::db::DbResult::Ok(nd)
        })
        .await?;
        if num_deleted > 0 {
            log::info!("Clean job log: {} entries cleaned", num_deleted);
        }
        log::trace!("Clean job log: done");
        Ok(())
    }
}

pub(crate) fn append_log(conn: &ConnType, entry: &NewJobLogEntry) -> DbResult<()> {
    diesel::insert_into(dsl::job_log).values(entry).execute(conn)?;
    Ok(())
}
