//! Rustrade-style headless server binary. Identical to `perpsentinel`'s
//! default binary; kept as a separate target so deployments that expect a
//! `server` binary name (container entrypoints, systemd units) work
//! unchanged, matching the teacher's `[[bin]] name = "server"` convention.

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

    info!("perpsentinel server {} starting...", env!("CARGO_PKG_VERSION"));
    info!("mode: headless (no ui, no http server)");

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
