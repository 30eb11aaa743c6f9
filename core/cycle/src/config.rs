use std::time::Duration;

use bigdecimal::BigDecimal;
use structopt::StructOpt;

#[derive(StructOpt, Clone, Debug)]
pub struct Config {
    #[structopt(flatten)]
    pub cycle: CycleConfig,
    #[structopt(flatten)]
    pub queue: QueueConfig,
    #[structopt(flatten)]
    pub db: DbConfig,
}

#[derive(StructOpt, Clone, Debug)]
pub struct CycleConfig {
    /// Failed-payment threshold at which a group is paused.
    #[structopt(long, env = "MAX_PAYMENT_RETRIES", default_value = "3")]
    pub max_payment_retries: i32,
    /// Delay before a failed payment is retried.
    #[structopt(long, env = "RETRY_DELAY", parse(try_from_str = humantime::parse_duration), default_value = "48h")]
    pub retry_delay: Duration,
    #[structopt(long, env = "LOCAL_LOCK_TTL", parse(try_from_str = humantime::parse_duration), default_value = "5m")]
    pub local_lock_ttl: Duration,
    #[structopt(long, env = "FEE_PERCENT", default_value = "0.01")]
    pub fee_percent: BigDecimal,
    #[structopt(long, env = "FEE_FIXED", default_value = "0.30")]
    pub fee_fixed: BigDecimal,
    #[structopt(long, env = "FEE_CAP", default_value = "3.50")]
    pub fee_cap: BigDecimal,
    /// Applied once to any retried debit.
    #[structopt(long, env = "RETRY_SURCHARGE", default_value = "2.50")]
    pub retry_surcharge: BigDecimal,
    /// Gateway calls per second per group.
    #[structopt(long, env = "GATEWAY_GROUP_RATE", default_value = "10")]
    pub gateway_group_rate: u32,
}

#[derive(StructOpt, Clone, Debug)]
pub struct QueueConfig {
    #[structopt(long, env = "QUEUE_WORKERS", default_value = "4")]
    pub workers: usize,
    /// Fallback poll interval; enqueues also wake workers directly.
    #[structopt(long, env = "QUEUE_POLL_INTERVAL", parse(try_from_str = humantime::parse_duration), default_value = "5s")]
    pub poll_interval: Duration,
    /// Per-job timeout; doubles as the visibility lease for stall detection.
    #[structopt(long, env = "CYCLE_JOB_TIMEOUT", parse(try_from_str = humantime::parse_duration), default_value = "120s")]
    pub job_timeout: Duration,
    /// Delivery attempts before a job is dead-lettered.
    #[structopt(long, env = "MAX_JOB_ATTEMPTS", default_value = "5")]
    pub max_job_attempts: i32,
}

#[derive(StructOpt, Clone, Debug)]
pub struct DbConfig {
    #[structopt(long, env = "DB_CLEANUP_INTERVAL", parse(try_from_str = humantime::parse_duration), default_value = "4h")]
    pub cleanup_interval: Duration,
    #[structopt(long, env = "COMPLETED_JOB_RETENTION", parse(try_from_str = humantime::parse_duration), default_value = "24h")]
    pub completed_job_retention: Duration,
    #[structopt(long, env = "DEAD_JOB_RETENTION", parse(try_from_str = humantime::parse_duration), default_value = "7days")]
    pub dead_job_retention: Duration,
    #[structopt(long, env = "JOB_LOG_RETENTION", parse(try_from_str = humantime::parse_duration), default_value = "30days")]
    pub job_log_retention: Duration,
    #[structopt(long, env = "WEBHOOK_RETENTION", parse(try_from_str = humantime::parse_duration), default_value = "30days")]
    pub webhook_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config, structopt::clap::Error> {
        // Empty command line; values come from env variables or defaults.
        Config::from_iter_safe(vec![""])
    }
}

/// Config durations are std; schedule arithmetic is chrono.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).expect("config durations fit in chrono range")
}
