//! Periodic JSON-line metrics reporter. No HTTP server — only outbound
//! stdout lines prefixed `METRICS_JSON:`, matching the teacher's
//! `infrastructure/observability/reporter.rs` push-based shape.

use prometheus::TextEncoder;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::metrics::Metrics;

#[derive(Serialize)]
struct MetricsSnapshot {
    uptime_seconds: u64,
    prometheus_text: String,
}

pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval: Duration) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval,
        }
    }

    /// Runs until cancelled; callers spawn this as a background task and
    /// drop the handle on shutdown (spec §5 background-task cancellation).
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.report_once();
        }
    }

    fn report_once(&self) {
        let encoder = TextEncoder::new();
        let families = self.metrics.registry().gather();
        let prometheus_text = match encoder.encode_to_string(&families) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode prometheus metrics: {e}");
                return;
            }
        };
        let snapshot = MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            prometheus_text,
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!("METRICS_JSON:{json}"),
            Err(e) => warn!("failed to serialize metrics snapshot: {e}"),
        }
    }
}
