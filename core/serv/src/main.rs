use std::sync::Arc;

use actix_web::{middleware, App, HttpServer};
use anyhow::{anyhow, Context};
use dotenv::dotenv;
use structopt::StructOpt;

use tanda_cycle::config::Config;
use tanda_cycle::notifier::LogNotifier;
use tanda_cycle::rest_api::{self, WebhookSecret};
use tanda_cycle::CycleService;
use tanda_dummy_gateway::DummyGateway;
use tanda_gateway::GatewayDriver;
use tanda_persistence::DbExecutor;

#[derive(StructOpt)]
#[structopt(name = "tanda", about = "Rotating-savings (ROSCA) cycle orchestrator")]
struct ServArgs {
    #[structopt(long, env = "TANDA_DB_PATH", default_value = "tanda.db")]
    db_path: String,
    #[structopt(long, env = "TANDA_HTTP_ADDRESS", default_value = "127.0.0.1:7465")]
    http_address: String,
    /// Shared secret for webhook signature verification.
    #[structopt(long, env = "GATEWAY_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: String,
    /// Payment gateway driver. Production drivers are registered here;
    /// `dummy` keeps everything in-process.
    #[structopt(long, env = "GATEWAY_DRIVER", default_value = "dummy")]
    gateway_driver: String,
    #[structopt(flatten)]
    config: Config,
}

fn gateway_driver(args: &ServArgs) -> anyhow::Result<Arc<dyn GatewayDriver>> {
    match args.gateway_driver.as_str() {
        "dummy" => Ok(Arc::new(DummyGateway::new(args.webhook_secret.as_bytes()))),
        other => Err(anyhow!("Unknown gateway driver: {}", other)),
    }
}

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = ServArgs::from_args();

    let db = DbExecutor::new(&args.db_path).context("opening database")?;
    let gateway = gateway_driver(&args)?;
    let notifier = Arc::new(LogNotifier);

    let service = CycleService::new(&db, gateway, notifier, Arc::new(args.config.clone()))
        .context("initializing cycle service")?;
    service.spawn_background();

    let secret = WebhookSecret(args.webhook_secret.clone().into_bytes());
    let http_address = args.http_address.clone();
    log::info!("Tanda orchestrator listening on {}", http_address);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .service(rest_api::gateway_scope(service.clone(), secret.clone()))
            .service(rest_api::admin_scope(service.clone()))
    })
    .bind(&http_address)
    .with_context(|| format!("binding {}", http_address))?
    .run()
    .await?;

    Ok(())
}
