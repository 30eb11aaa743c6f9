pub mod notify;
mod worker;

pub use notify::{EnqueueListener, EnqueueNotifier};
pub use worker::{spawn_workers, WorkerContext};
