//! Top-level `Application`: builds every service via `bootstrap`, spawns the
//! three concurrent actors (orchestrator, live monitor, sentinel), and
//! manages graceful shutdown.
//!
//! Grounded in the teacher's `application/system/mod.rs` + `shutdown_service.rs`
//! shape, with one deliberate departure: the teacher's shutdown always
//! cancels open venue orders regardless of a `flatten_on_exit` flag; this
//! control plane's shutdown policy never cancels orders (operator-managed
//! positions survive a restart), so that step is simply absent here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::bootstrap::{self, Bootstrapped};
use crate::application::live_monitor::LiveMonitor;
use crate::application::sentinel::Sentinel;
use crate::config::Config;
use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::observability::reporter::MetricsReporter;

pub struct Application {
    config: Config,
    metrics_for_reporting: Metrics,
    bootstrapped: Bootstrapped,
}

pub struct SystemHandle {
    shutdown_tx: watch::Sender<bool>,
    orchestrator_task: JoinHandle<()>,
    live_monitor_task: JoinHandle<()>,
    sentinel_task: JoinHandle<()>,
    reporter_task: Option<JoinHandle<()>>,
}

impl Application {
    /// Loads config, builds metrics, loads agent definitions, and wires
    /// every service via `bootstrap::bootstrap`.
    pub fn build(config: Config) -> Result<Self> {
        let metrics_for_reporting = Metrics::new()?;
        let metrics = Arc::new(metrics_for_reporting.clone());
        let agents = crate::config::load_agents_dir(&config.agents_dir)?;
        if agents.is_empty() {
            info!("no agent definitions found in {}, starting with an empty roster", config.agents_dir);
        }
        let bootstrapped = bootstrap::bootstrap(&config, metrics, agents)?;
        Ok(Self { config, metrics_for_reporting, bootstrapped })
    }

    /// Spawns the orchestrator, live monitor, and sentinel as independent
    /// tasks, plus the metrics reporter when observability is enabled.
    /// Returns immediately with a handle used to drive shutdown.
    pub fn start(self) -> SystemHandle {
        let Application { config, metrics_for_reporting, bootstrapped } = self;
        let Bootstrapped { orchestrator, live_monitor, live_monitor_shared, sentinel, sentinel_shared } = bootstrapped;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let orchestrator_task = tokio::spawn(orchestrator.run(shutdown_rx));

        let live_monitor_task = tokio::spawn(run_live_monitor(live_monitor, live_monitor_shared));
        let sentinel_task = tokio::spawn(run_sentinel(sentinel, sentinel_shared));

        let reporter_task = if config.observability.enabled {
            let reporter = MetricsReporter::new(
                metrics_for_reporting,
                Duration::from_secs(config.observability.report_interval_secs),
            );
            Some(tokio::spawn(reporter.run()))
        } else {
            None
        };

        SystemHandle {
            shutdown_tx,
            orchestrator_task,
            live_monitor_task,
            sentinel_task,
            reporter_task,
        }
    }
}

async fn run_live_monitor(live_monitor: LiveMonitor, shared: bootstrap::LiveMonitorShared) {
    live_monitor
        .run(shared.positions, shared.filters, shared.debounce, shared.event_tx)
        .await;
}

async fn run_sentinel(sentinel: Sentinel, shared: bootstrap::SentinelShared) {
    sentinel
        .run(shared.positions, shared.mutex_states, shared.filters, shared.event_tx)
        .await;
}

impl SystemHandle {
    /// Signals shutdown and waits for every task to stop. The orchestrator
    /// finishes whatever cycle is in flight, force-flushes its CSV buffers,
    /// then returns; Live Monitor and Sentinel are aborted at their next
    /// tick since their only state is in-flight network calls with nothing
    /// left to flush. No venue orders are cancelled (operator policy).
    pub async fn shutdown(self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.orchestrator_task.await {
            tracing::warn!(error = %e, "orchestrator task panicked during shutdown");
        }

        self.live_monitor_task.abort();
        self.sentinel_task.abort();
        if let Some(reporter_task) = self.reporter_task {
            reporter_task.abort();
        }

        info!("shutdown complete");
    }
}
