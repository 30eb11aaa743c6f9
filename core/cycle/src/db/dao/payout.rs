use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use tanda_persistence::{readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::{check_payout_transition, InvalidPayoutTransition, Payout, PayoutStatus};
use crate::db::schema::payout::dsl;
use crate::db::{DbError, DbResult};

#[derive(thiserror::Error, Debug)]
pub enum PayoutDaoError {
    #[error("Payout [{0}] not found.")]
    NotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidPayoutTransition),
    #[error("Failed to update payout. Error: {0}")]
    DbError(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for PayoutDaoError {
    fn from(err: ErrorType) -> Self {
        PayoutDaoError::DbError(err.into())
    }
}

pub struct PayoutDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for PayoutDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> PayoutDao<'c> {
    pub async fn get_by_cycle(
        &self,
        group_id: &str,
        cycle_number: i32,
    ) -> DbResult<Option<Payout>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            get_payout_by_cycle(conn, &group_id, cycle_number)
        })
        .await
    }

    pub async fn for_group(&self, group_id: &str) -> DbResult<Vec<Payout>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::payout
                .filter(dsl::group_id.eq(&group_id))
                .order_by(dsl::cycle_number.asc())
                .load::<Payout>(conn)?)
        })
        .await
    }
}

pub(crate) fn get_payout_by_cycle(
    conn: &ConnType,
    group_id: &str,
    cycle_number: i32,
) -> DbResult<Option<Payout>> {
    Ok(dsl::payout
        .filter(dsl::group_id.eq(group_id))
        .filter(dsl::cycle_number.eq(cycle_number))
        .first::<Payout>(conn)
        .optional()?)
}

/// Highest settled cycle number; the next cycle to run is this + 1.
pub(crate) fn last_cycle_number(conn: &ConnType, group_id: &str) -> DbResult<i32> {
    let last = dsl::payout
        .filter(dsl::group_id.eq(group_id))
        .order_by(dsl::cycle_number.desc())
        .first::<Payout>(conn)
        .optional()?;
    Ok(last.map(|p| p.cycle_number).unwrap_or(0))
}

pub(crate) enum PayoutCreateOutcome {
    Created(Payout),
    Existing(Payout),
}

pub(crate) fn create_payout_if_absent(
    conn: &ConnType,
    payout: Payout,
) -> DbResult<PayoutCreateOutcome> {
    match diesel::insert_into(dsl::payout).values(&payout).execute(conn) {
        Ok(_) => Ok(PayoutCreateOutcome::Created(payout)),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let existing = dsl::payout
                .filter(dsl::group_id.eq(&payout.group_id))
                .filter(dsl::cycle_number.eq(payout.cycle_number))
                .first::<Payout>(conn)?;
            Ok(PayoutCreateOutcome::Existing(existing))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn find_payout_by_transfer(
    conn: &ConnType,
    transfer_id: &str,
) -> DbResult<Option<Payout>> {
    Ok(dsl::payout
        .filter(dsl::gateway_transfer_id.eq(transfer_id))
        .first::<Payout>(conn)
        .optional()?)
}

pub(crate) fn update_payout_status(
    conn: &ConnType,
    payout: &mut Payout,
    to: PayoutStatus,
) -> Result<(), PayoutDaoError> {
    check_payout_transition(payout.status, to)?;

    diesel::update(dsl::payout.find(&payout.id))
        .set((
            dsl::status.eq(to),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .map_err(|e| PayoutDaoError::DbError(e.into()))?;

    payout.status = to;
    Ok(())
}
