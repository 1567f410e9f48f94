//! Agent status registry: observability-only, no control-flow effect. Tracks
//! each agent's health and last-decision timestamp so the metrics reporter
//! can surface stalled or erroring agents. Grounded in the teacher's
//! `application/monitoring/agent_status.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::infrastructure::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Dead,
    Starting,
}

impl HealthStatus {
    fn to_metric_value(self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Dead => 0.0,
            HealthStatus::Starting => 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub agent_id: String,
    pub health: HealthStatus,
    pub last_decision_timestamp: DateTime<Utc>,
    pub last_signal: Option<String>,
}

pub struct AgentStatusRegistry {
    statuses: RwLock<HashMap<String, AgentStatus>>,
    metrics: Arc<Metrics>,
}

impl AgentStatusRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Called whenever an agent's `DecisionProvider::decide` call succeeds.
    pub async fn record_decision(&self, agent_id: &str, signal: &str) {
        let mut statuses = self.statuses.write().await;
        self.metrics
            .agent_up
            .with_label_values(&[agent_id])
            .set(HealthStatus::Healthy.to_metric_value());
        self.metrics
            .agent_last_decision_timestamp
            .with_label_values(&[agent_id])
            .set(Utc::now().timestamp() as f64);

        statuses
            .entry(agent_id.to_string())
            .and_modify(|s| {
                s.health = HealthStatus::Healthy;
                s.last_decision_timestamp = Utc::now();
                s.last_signal = Some(signal.to_string());
            })
            .or_insert_with(|| AgentStatus {
                agent_id: agent_id.to_string(),
                health: HealthStatus::Healthy,
                last_decision_timestamp: Utc::now(),
                last_signal: Some(signal.to_string()),
            });
    }

    /// Called whenever an agent's `DecisionProvider::decide` call errors.
    pub async fn record_error(&self, agent_id: &str) {
        let mut statuses = self.statuses.write().await;
        self.metrics
            .agent_up
            .with_label_values(&[agent_id])
            .set(HealthStatus::Degraded.to_metric_value());

        statuses
            .entry(agent_id.to_string())
            .and_modify(|s| s.health = HealthStatus::Degraded)
            .or_insert_with(|| AgentStatus {
                agent_id: agent_id.to_string(),
                health: HealthStatus::Degraded,
                last_decision_timestamp: Utc::now(),
                last_signal: None,
            });
    }

    pub async fn get_all(&self) -> HashMap<String, AgentStatus> {
        self.statuses.read().await.clone()
    }
}
