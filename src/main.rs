//! Headless control-plane entry point. No GUI, no HTTP server — metrics are
//! pushed via structured JSON log lines (`METRICS_JSON:` prefix), matching
//! the teacher's headless server binary. The GUI frontend the teacher also
//! ships is out of scope here and was dropped along with its dependencies
//! (see DESIGN.md).

use anyhow::Result;
use perpsentinel::application::system::Application;
use perpsentinel::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("perpsentinel {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(cadence_secs = config.orchestrator.cycle_cadence_secs, "configuration loaded");

    let app = Application::build(config)?;
    let handle = app.start();
    info!("control plane running, press ctrl-c to shut down");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
