#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod config;
pub mod db;
pub mod fees;
pub mod lock;
pub mod notifier;
pub mod processor;
pub mod queue;
pub mod rate;
pub mod rest_api;
pub mod scheduler;
mod service;
pub mod webhook;

pub mod testing;

pub use service::{CycleService, InitError, QueueStats, ServiceError};
