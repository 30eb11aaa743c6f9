/// Maps an `#[repr(i32)]`-style enum onto an INTEGER column. Unknown values
/// coming back from the database are a deserialization error, not a panic.
macro_rules! db_int_enum {
    ($name:ident) => {
        impl<DB: diesel::backend::Backend> diesel::types::ToSql<diesel::sql_types::Integer, DB>
            for $name
        where
            i32: diesel::types::ToSql<diesel::sql_types::Integer, DB>,
        {
            fn to_sql<W: std::io::Write>(
                &self,
                out: &mut diesel::serialize::Output<W, DB>,
            ) -> diesel::serialize::Result {
                let value = *self as i32;
                <i32 as diesel::types::ToSql<diesel::sql_types::Integer, DB>>::to_sql(&value, out)
            }
        }

        impl<DB> diesel::types::FromSql<diesel::sql_types::Integer, DB> for $name
        where
            i32: diesel::types::FromSql<diesel::sql_types::Integer, DB>,
            DB: diesel::backend::Backend,
        {
            fn from_sql(
                bytes: Option<&DB::RawValue>,
            ) -> diesel::deserialize::Result<Self> {
                let enum_value =
                    <i32 as diesel::types::FromSql<diesel::sql_types::Integer, DB>>::from_sql(
                        bytes,
                    )?;
                <$name as num_traits::FromPrimitive>::from_i32(enum_value).ok_or_else(|| {
                    format!(
                        "Invalid conversion from {} (i32) to {}.",
                        enum_value,
                        stringify!($name)
                    )
                    .into()
                })
            }
        }
    };
}

mod group;
mod job;
mod member;
mod payment;
mod payout;
mod webhook;

pub use group::{
    check_group_transition, CycleFrequency, Group, GroupId, GroupStatus, InvalidGroupTransition,
    PauseReason,
};
pub use job::{
    Job, JobDecodeError, JobKind, JobLogEntry, JobState, NewJobLogEntry, ScheduledJob, Severity,
};
pub use member::{Member, MemberId, MemberStatus};
pub use payment::{check_payment_transition, InvalidPaymentTransition, Payment, PaymentStatus};
pub use payout::{check_payout_transition, InvalidPayoutTransition, Payout, PayoutStatus};
pub use webhook::WebhookEventRow;
