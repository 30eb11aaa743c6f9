use chrono::{NaiveDateTime, Utc};
use diesel::sql_types::Integer;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use bigdecimal::BigDecimal;
use tanda_persistence::BigDecimalField;

use crate::db::model::{GroupId, MemberId};
use crate::db::schema::payment;

#[derive(
    FromPrimitive,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
    derive_more::Display,
    Serialize,
    Deserialize,
)]
#[sql_type = "Integer"]
pub enum PaymentStatus {
    Pending = 0,
    Successful = 1,
    Failed = 2,
}

db_int_enum!(PaymentStatus);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Can't update Payment state from {from} to {to}.")]
pub struct InvalidPaymentTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

/// Pending -> Successful | Failed; Failed -> Pending (retry) | Successful
/// (late confirmation). Successful is terminal.
pub fn check_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), InvalidPaymentTransition> {
    let allowed = match from {
        PaymentStatus::Pending => {
            matches!(to, PaymentStatus::Successful | PaymentStatus::Failed)
        }
        PaymentStatus::Failed => {
            matches!(to, PaymentStatus::Pending | PaymentStatus::Successful)
        }
        PaymentStatus::Successful => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(InvalidPaymentTransition { from, to })
    }
}

/// One debit attempt chain of one member in one cycle. Unique on
/// `(group_id, cycle_number, member_id)`; the row's existence is the record
/// that this debit was initiated.
#[derive(Clone, Debug, Identifiable, Insertable, Queryable, AsChangeset)]
#[table_name = "payment"]
pub struct Payment {
    pub id: String,
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub cycle_number: i32,
    pub amount: BigDecimalField,
    pub status: PaymentStatus,
    pub retry_count: i32,
    pub gateway_intent_id: Option<String>,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}

impl Payment {
    pub fn new(
        group_id: &str,
        member_id: &str,
        cycle_number: i32,
        amount: BigDecimal,
    ) -> Payment {
        let now = Utc::now().naive_utc();
        Payment {
            id: uuid::Uuid::new_v4().to_simple().to_string(),
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
            cycle_number,
            amount: amount.into(),
            status: PaymentStatus::Pending,
            retry_count: 0,
            gateway_intent_id: None,
            created_ts: now,
            updated_ts: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_is_terminal() {
        assert!(
            check_payment_transition(PaymentStatus::Successful, PaymentStatus::Failed).is_err()
        );
        assert!(
            check_payment_transition(PaymentStatus::Successful, PaymentStatus::Pending).is_err()
        );
    }

    #[test]
    fn failed_payment_can_go_back_to_pending() {
        assert!(check_payment_transition(PaymentStatus::Failed, PaymentStatus::Pending).is_ok());
    }
}
