//! cms-sync daemon: loads config, serves webhooks and the operator API,
//! and drains the sync queue until ctrl-c.

use anyhow::{Context, Result};
use cs_core::config::{Config, LogFormat};
use cs_daemon::daemon::Daemon;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load config")?;

    match config.general.log_format {
        LogFormat::Pretty => cs_telemetry::logging::init_logging(&config.general.service_name, &config.general.log_level),
        LogFormat::Json => {
            cs_telemetry::logging::init_logging_json(&config.general.service_name, &config.general.log_level)
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), platforms = config.platforms.len(), "cms-sync starting");

    let daemon = Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        shutdown.trigger();
    });

    daemon.run().await
}
