pub mod cleaner;
mod group;
mod job_log;
mod job_queue;
mod member;
mod payment;
mod payout;
mod webhook_event;

pub use group::{GroupDao, GroupDaoError};
pub use job_log::JobLogDao;
pub use job_queue::JobQueueDao;
pub use member::MemberDao;
pub use payment::{PaymentDao, PaymentDaoError};
pub use payout::{PayoutDao, PayoutDaoError};
pub use webhook_event::WebhookEventDao;

pub(crate) use group::{
    get_group, mark_cycle_started, pause_group, recompute_aggregates, resume_group, set_frequency,
    set_schedule, update_group_status,
};
pub(crate) use job_log::append_log;
pub(crate) use job_queue::enqueue_job;
pub(crate) use member::{active_members, find_by_account_ref, set_member_paid};
pub(crate) use payment::{
    bump_payment_retry, create_payment_if_absent, find_payment, find_payment_by_intent,
    list_cycle_payments, set_payment_intent, update_payment_status, CreateOutcome,
};
pub(crate) use payout::{
    create_payout_if_absent, find_payout_by_transfer, get_payout_by_cycle, last_cycle_number,
    update_payout_status, PayoutCreateOutcome,
};
pub(crate) use webhook_event::{mark_event_applied, record_event_if_new};
