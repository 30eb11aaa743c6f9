use chrono::{NaiveDateTime, Utc};
use diesel::sql_types::Integer;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use bigdecimal::BigDecimal;
use tanda_persistence::BigDecimalField;

use crate::db::model::{GroupId, MemberId};
use crate::db::schema::payout;

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
pub enum PayoutStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

db_int_enum!(PayoutStatus);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Can't update Payout state from {from} to {to}.")]
pub struct InvalidPayoutTransition {
    pub from: PayoutStatus,
    pub to: PayoutStatus,
}

/// Completed -> Failed stays open because the provider can reverse a
/// transfer after the fact.
pub fn check_payout_transition(
    from: PayoutStatus,
    to: PayoutStatus,
) -> Result<(), InvalidPayoutTransition> {
    let allowed = match from {
        PayoutStatus::Pending => matches!(to, PayoutStatus::Completed | PayoutStatus::Failed),
        PayoutStatus::Completed => matches!(to, PayoutStatus::Failed),
        PayoutStatus::Failed => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(InvalidPayoutTransition { from, to })
    }
}

/// The pooled amount of one cycle, destined for exactly one payee. Unique on
/// `(group_id, cycle_number)`.
#[derive(Clone, Debug, Identifiable, Insertable, Queryable, AsChangeset)]
#[table_name = "payout"]
pub struct Payout {
    pub id: String,
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub cycle_number: i32,
    pub amount: BigDecimalField,
    pub status: PayoutStatus,
    pub gateway_transfer_id: Option<String>,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}

impl Payout {
    pub fn new(
        group_id: &str,
        member_id: &str,
        cycle_number: i32,
        amount: BigDecimal,
        status: PayoutStatus,
    ) -> Payout {
        let now = Utc::now().naive_utc();
        Payout {
            id: uuid::Uuid::new_v4().to_simple().to_string(),
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
            cycle_number,
            amount: amount.into(),
            status,
            gateway_transfer_id: None,
            created_ts: now,
            updated_ts: now,
        }
    }
}
