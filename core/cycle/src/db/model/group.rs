use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::sql_types::Integer;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use tanda_persistence::BigDecimalField;

use crate::db::schema::rosca_group;

pub type GroupId = String;

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
pub enum CycleFrequency {
    Daily = 0,
    Weekly = 1,
    BiWeekly = 2,
    Monthly = 3,
}

db_int_enum!(CycleFrequency);

impl FromStr for CycleFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(CycleFrequency::Daily),
            "weekly" => Ok(CycleFrequency::Weekly),
            "biweekly" | "bi-weekly" => Ok(CycleFrequency::BiWeekly),
            "monthly" => Ok(CycleFrequency::Monthly),
            other => Err(format!("Unknown cycle frequency: {}", other)),
        }
    }
}

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
pub enum GroupStatus {
    /// Created externally, cycles not started yet.
    Initialized = 0,
    Active = 1,
    /// No new cycles start; in-flight operations may still resolve.
    Paused = 2,
    /// Terminal.
    Ended = 3,
}

db_int_enum!(GroupStatus);

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
pub enum PauseReason {
    PaymentFailures = 0,
    AllPaid = 1,
    Admin = 2,
    Subscription = 3,
}

db_int_enum!(PauseReason);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Can't update Group state from {from} to {to}.")]
pub struct InvalidGroupTransition {
    pub from: GroupStatus,
    pub to: GroupStatus,
}

pub fn check_group_transition(
    from: GroupStatus,
    to: GroupStatus,
) -> Result<(), InvalidGroupTransition> {
    let allowed = match from {
        GroupStatus::Initialized => matches!(to, GroupStatus::Active | GroupStatus::Ended),
        GroupStatus::Active => matches!(to, GroupStatus::Paused | GroupStatus::Ended),
        GroupStatus::Paused => matches!(to, GroupStatus::Active | GroupStatus::Ended),
        GroupStatus::Ended => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(InvalidGroupTransition { from, to })
    }
}

#[derive(Clone, Debug, Identifiable, Insertable, Queryable, AsChangeset)]
#[table_name = "rosca_group"]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub contribution_amount: BigDecimalField,
    pub cycle_frequency: CycleFrequency,
    pub status: GroupStatus,
    pub pause_reason: Option<PauseReason>,
    pub cycle_started: bool,
    pub next_cycle_date: Option<NaiveDateTime>,
    /// JSON array of upcoming cycle dates, strictly increasing;
    /// `next_cycle_date` mirrors the head when non-empty.
    pub future_cycles: String,
    pub total_debited: BigDecimalField,
    pub total_pending: BigDecimalField,
    pub total_success: BigDecimalField,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}

impl Group {
    pub fn new(name: &str, contribution_amount: BigDecimal, frequency: CycleFrequency) -> Group {
        let now = Utc::now().naive_utc();
        Group {
            id: uuid::Uuid::new_v4().to_simple().to_string(),
            name: name.to_string(),
            contribution_amount: contribution_amount.into(),
            cycle_frequency: frequency,
            status: GroupStatus::Initialized,
            pause_reason: None,
            cycle_started: false,
            next_cycle_date: None,
            future_cycles: "[]".to_string(),
            total_debited: BigDecimal::from(0).into(),
            total_pending: BigDecimal::from(0).into(),
            total_success: BigDecimal::from(0).into(),
            created_ts: now,
            updated_ts: now,
        }
    }

    pub fn future_cycle_dates(&self) -> Vec<NaiveDate> {
        serde_json::from_str(&self.future_cycles).unwrap_or_default()
    }

    pub fn encode_cycles(dates: &[NaiveDate]) -> String {
        serde_json::to_string(dates).expect("a list of dates serializes")
    }
}
