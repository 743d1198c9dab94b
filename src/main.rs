use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use wattpilot::config::{Config, DEFAULT_CONFIG_PATH};
use wattpilot::controller::Services;
use wattpilot::hardware::{DeviceFactory, HardwareMode};
use wattpilot::{api, telemetry};

#[derive(Debug, Parser)]
#[command(name = "wattpilot")]
#[command(author, version, about = "Run water heaters on solar surplus")]
struct Args {
    /// Configuration file, merged with WATTPILOT__* environment variables
    #[arg(short, long, env = "WATTPILOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated relays and temperature probe
    #[arg(long)]
    fake_devices: bool,

    /// Debug logs for wattpilot itself (ignored when RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    telemetry::init_tracing(args.verbose);

    let cfg = Config::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    let factory = DeviceFactory::new(HardwareMode::from_flag(args.fake_devices));
    if factory.mode() == HardwareMode::Simulated {
        warn!("using simulated relays and temperature probe");
    }

    let services = Services::start(cfg.clone(), &factory).await?;
    if !services.controller().idle().await? {
        error!("controller refused to leave halt");
    }

    let app = api::router(services.state.clone(), &cfg);
    let addr = cfg.server.socket_addr()?;
    info!(%addr, loads = cfg.loads.len(), "starting WattPilot");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await;

    services.shutdown().await?;
    served?;
    warn!("shutdown complete");
    Ok(())
}
