use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use bigdecimal::BigDecimal;
use tanda_persistence::{readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::{
    check_payment_transition, InvalidPaymentTransition, Payment, PaymentStatus,
};
use crate::db::schema::payment::dsl;
use crate::db::{DbError, DbResult};

#[derive(thiserror::Error, Debug)]
pub enum PaymentDaoError {
    #[error("Payment [{0}] not found.")]
    NotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidPaymentTransition),
    #[error("Failed to update payment. Error: {0}")]
    DbError(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for PaymentDaoError {
    fn from(err: ErrorType) -> Self {
        PaymentDaoError::DbError(err.into())
    }
}

pub struct PaymentDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for PaymentDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> PaymentDao<'c> {
    pub async fn get(&self, payment_id: &str) -> DbResult<Option<Payment>> {
        let payment_id = payment_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::payment
                .filter(dsl::id.eq(&payment_id))
                .first::<Payment>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list(&self, group_id: &str, cycle_number: i32) -> DbResult<Vec<Payment>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            list_cycle_payments(conn, &group_id, cycle_number)
        })
        .await
    }

    pub async fn by_intent(&self, intent_id: &str) -> DbResult<Option<Payment>> {
        let intent_id = intent_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            find_payment_by_intent(conn, &intent_id)
        })
        .await
    }

    pub async fn for_group(&self, group_id: &str) -> DbResult<Vec<Payment>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::payment
                .filter(dsl::group_id.eq(&group_id))
                .order_by((dsl::cycle_number.asc(), dsl::created_ts.asc()))
                .load::<Payment>(conn)?)
        })
        .await
    }
}

pub(crate) enum CreateOutcome {
    Created(Payment),
    /// The `(group, cycle, member)` row already exists; concurrent workers
    /// and redelivered jobs land here.
    Existing(Payment),
}

pub(crate) fn create_payment_if_absent(
    conn: &ConnType,
    payment: Payment,
) -> DbResult<CreateOutcome> {
    match diesel::insert_into(dsl::payment)
        .values(&payment)
        .execute(conn)
    {
        Ok(_) => Ok(CreateOutcome::Created(payment)),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let existing = dsl::payment
                .filter(dsl::group_id.eq(&payment.group_id))
                .filter(dsl::cycle_number.eq(payment.cycle_number))
                .filter(dsl::member_id.eq(&payment.member_id))
                .first::<Payment>(conn)?;
            Ok(CreateOutcome::Existing(existing))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn find_payment(conn: &ConnType, payment_id: &str) -> DbResult<Option<Payment>> {
    Ok(dsl::payment
        .filter(dsl::id.eq(payment_id))
        .first::<Payment>(conn)
        .optional()?)
}

pub(crate) fn list_cycle_payments(
    conn: &ConnType,
    group_id: &str,
    cycle_number: i32,
) -> DbResult<Vec<Payment>> {
    Ok(dsl::payment
        .filter(dsl::group_id.eq(group_id))
        .filter(dsl::cycle_number.eq(cycle_number))
        .order_by(dsl::created_ts.asc())
        .load::<Payment>(conn)?)
}

pub(crate) fn find_payment_by_intent(
    conn: &ConnType,
    intent_id: &str,
) -> DbResult<Option<Payment>> {
    Ok(dsl::payment
        .filter(dsl::gateway_intent_id.eq(intent_id))
        .first::<Payment>(conn)
        .optional()?)
}

pub(crate) fn set_payment_intent(
    conn: &ConnType,
    payment: &mut Payment,
    intent_id: &str,
) -> DbResult<()> {
    diesel::update(dsl::payment.find(&payment.id))
        .set((
            dsl::gateway_intent_id.eq(intent_id),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    payment.gateway_intent_id = Some(intent_id.to_string());
    Ok(())
}

/// Status change with transition check; optionally bumps the retry counter
/// and swaps the gateway intent in the same statement.
pub(crate) fn update_payment_status(
    conn: &ConnType,
    payment: &mut Payment,
    to: PaymentStatus,
    bump_retry: bool,
    new_intent_id: Option<&str>,
) -> Result<(), PaymentDaoError> {
    check_payment_transition(payment.status, to)?;

    let retry_count = payment.retry_count + if bump_retry { 1 } else { 0 };
    let intent = new_intent_id
        .map(str::to_string)
        .or_else(|| payment.gateway_intent_id.clone());

    diesel::update(dsl::payment.find(&payment.id))
        .set((
            dsl::status.eq(to),
            dsl::retry_count.eq(retry_count),
            dsl::gateway_intent_id.eq(intent.clone()),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .map_err(|e| PaymentDaoError::DbError(e.into()))?;

    payment.status = to;
    payment.retry_count = retry_count;
    payment.gateway_intent_id = intent;
    Ok(())
}

/// Counts a failed attempt without changing status. Used when the retry
/// itself is refused by the provider.
pub(crate) fn bump_payment_retry(conn: &ConnType, payment: &mut Payment) -> DbResult<()> {
    let retry_count = payment.retry_count + 1;
    diesel::update(dsl::payment.find(&payment.id))
        .set((
            dsl::retry_count.eq(retry_count),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    payment.retry_count = retry_count;
    Ok(())
}

pub(crate) struct AmountTotals {
    pub debited: BigDecimal,
    pub pending: BigDecimal,
    pub success: BigDecimal,
}

/// `debited` counts everything that is not Failed; sums are computed in
/// Rust because amounts are stored as exact-decimal text.
pub(crate) fn group_amount_totals(conn: &ConnType, group_id: &str) -> DbResult<AmountTotals> {
    let payments = dsl::payment
        .filter(dsl::group_id.eq(group_id))
        .load::<Payment>(conn)?;

    let mut totals = AmountTotals {
        debited: BigDecimal::from(0),
        pending: BigDecimal::from(0),
        success: BigDecimal::from(0),
    };
    for p in payments {
        match p.status {
            PaymentStatus::Pending => {
                totals.debited += &p.amount.0;
                totals.pending += &p.amount.0;
            }
            PaymentStatus::Successful => {
                totals.debited += &p.amount.0;
                totals.success += &p.amount.0;
            }
            PaymentStatus::Failed => {}
        }
    }
    Ok(totals)
}
