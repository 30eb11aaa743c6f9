//! Operator control for a running orchestrator, over its admin REST API.
//!
//! Exit codes: 0 success, 2 entity not found, 3 invariant violation,
//! 1 anything else.

use anyhow::Context;
use serde::Deserialize;
use structopt::StructOpt;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOT_FOUND: i32 = 2;
const EXIT_INVARIANT: i32 = 3;

#[derive(StructOpt, Debug)]
#[structopt(name = "ctl", about = "Tanda operator control")]
struct CliArgs {
    #[structopt(long, env = "TANDA_API_URL", default_value = "http://127.0.0.1:7465")]
    api_url: String,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Show a group's schedule, state and aggregates
    Status { group_id: String },
    /// Pause a group
    Pause {
        group_id: String,
        /// PaymentFailures | AllPaid | Admin | Subscription
        #[structopt(long)]
        reason: Option<String>,
    },
    /// Resume a paused group and re-enqueue its next cycle
    Retry { group_id: String },
    /// List a group's payments across cycles
    Payments { group_id: String },
    /// Show a group's recent orchestrator log entries
    Log { group_id: String },
    /// Re-apply a stored gateway webhook event
    ReplayWebhook { event_id: String },
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    kind: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::from_args();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(args: CliArgs) -> anyhow::Result<i32> {
    let client = reqwest::Client::new();
    let base = args.api_url.trim_end_matches('/');

    let response = match &args.command {
        Command::Status { group_id } => {
            client
                .get(format!("{}/admin-api/v1/groups/{}", base, group_id))
                .send()
                .await
        }
        Command::Pause { group_id, reason } => {
            client
                .post(format!("{}/admin-api/v1/groups/{}/pause", base, group_id))
                .json(&serde_json::json!({ "reason": reason }))
                .send()
                .await
        }
        Command::Retry { group_id } => {
            client
                .post(format!("{}/admin-api/v1/groups/{}/retry", base, group_id))
                .json(&serde_json::json!({}))
                .send()
                .await
        }
        Command::Payments { group_id } => {
            client
                .get(format!("{}/admin-api/v1/groups/{}/payments", base, group_id))
                .send()
                .await
        }
        Command::Log { group_id } => {
            client
                .get(format!("{}/admin-api/v1/groups/{}/log", base, group_id))
                .send()
                .await
        }
        Command::ReplayWebhook { event_id } => {
            client
                .post(format!("{}/admin-api/v1/webhooks/{}/replay", base, event_id))
                .json(&serde_json::json!({}))
                .send()
                .await
        }
    }
    .context("request to orchestrator failed")?;

    let status = response.status();
    let text = response.text().await.context("reading response body")?;

    if status.is_success() {
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{}", text),
        }
        return Ok(EXIT_OK);
    }

    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    match &body {
        Some(body) => eprintln!("{}", body.message),
        None => eprintln!("Request failed with status {}: {}", status, text),
    }

    let kind = body.and_then(|b| b.kind);
    Ok(
        if status == reqwest::StatusCode::NOT_FOUND || kind.as_deref() == Some("not-found") {
            EXIT_NOT_FOUND
        } else if kind.as_deref() == Some("invariant-violation") {
            EXIT_INVARIANT
        } else {
            EXIT_ERROR
        },
    )
}
