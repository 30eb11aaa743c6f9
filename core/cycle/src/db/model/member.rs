use chrono::{NaiveDateTime, Utc};
use diesel::sql_types::Integer;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::db::model::GroupId;
use crate::db::schema::group_member;

pub type MemberId = String;

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
pub enum MemberStatus {
    Active = 0,
    Inactive = 1,
}

db_int_enum!(MemberStatus);

/// Group membership. Within an active group the `payout_order` values of
/// active members form a contiguous 1..N permutation; `has_been_paid` only
/// ever flips False -> True.
#[derive(Clone, Debug, Identifiable, Insertable, Queryable, AsChangeset)]
#[table_name = "group_member"]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    pub user_id: String,
    pub payout_order: i32,
    pub status: MemberStatus,
    pub has_been_paid: bool,
    pub is_admin: bool,
    /// Provider-side account reference; payout destination.
    pub account_ref: Option<String>,
    /// Debit mandate reference; a member without one cannot be debited.
    pub mandate_ref: Option<String>,
    pub created_ts: NaiveDateTime,
}

impl Member {
    pub fn new(group_id: &str, user_id: &str, payout_order: i32) -> Member {
        Member {
            id: uuid::Uuid::new_v4().to_simple().to_string(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            payout_order,
            status: MemberStatus::Active,
            has_been_paid: false,
            is_admin: payout_order == 1,
            account_ref: Some(format!("acct_{}", user_id)),
            mandate_ref: Some(format!("mandate_{}", user_id)),
            created_ts: Utc::now().naive_utc(),
        }
    }

    pub fn without_mandate(mut self) -> Member {
        self.mandate_ref = None;
        self
    }

    pub fn can_be_debited(&self) -> bool {
        self.mandate_ref.is_some() && self.account_ref.is_some()
    }
}
