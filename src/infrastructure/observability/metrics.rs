//! Prometheus metrics for the trading control plane (`perpsentinel_` prefix).
//! Push-based: no HTTP server, no incoming connections (spec §1 "HTTP/WS
//! dashboard API" out of scope — the reporting mechanism is ambient stack,
//! the server surface is not). Grounded in the teacher's
//! `infrastructure/observability/metrics.rs`.

use prometheus::{CounterVec, Gauge, GaugeVec, Opts, Registry};

#[derive(Clone)]
pub struct Metrics {
    registry: std::sync::Arc<Registry>,
    pub open_positions: Gauge,
    pub position_value_usd: GaugeVec,
    pub total_equity_usd: Gauge,
    pub drawdown_current: Gauge,
    pub kill_switch_active: Gauge,
    pub circuit_breaker_status: GaugeVec,
    pub cycle_duration_seconds: Gauge,
    pub cycles_total: CounterVec,
    pub orders_total: CounterVec,
    pub reattach_total: CounterVec,
    pub agent_up: GaugeVec,
    pub agent_last_decision_timestamp: GaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let open_positions = Gauge::with_opts(Opts::new(
            "perpsentinel_open_positions",
            "Number of open positions across all symbols",
        ))?;
        registry.register(Box::new(open_positions.clone()))?;

        let position_value_usd = GaugeVec::new(
            Opts::new("perpsentinel_position_value_usd", "Notional value per symbol"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_value_usd.clone()))?;

        let total_equity_usd = Gauge::with_opts(Opts::new(
            "perpsentinel_total_equity_usd",
            "Realized + unrealized equity",
        ))?;
        registry.register(Box::new(total_equity_usd.clone()))?;

        let drawdown_current = Gauge::with_opts(Opts::new(
            "perpsentinel_drawdown_current",
            "Current drawdown from peak equity",
        ))?;
        registry.register(Box::new(drawdown_current.clone()))?;

        let kill_switch_active = Gauge::with_opts(Opts::new(
            "perpsentinel_kill_switch_active",
            "1 if any kill-switch is tripped, else 0",
        ))?;
        registry.register(Box::new(kill_switch_active.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new(
                "perpsentinel_circuit_breaker_status",
                "1 if the named breaker is tripped, else 0",
            ),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let cycle_duration_seconds = Gauge::with_opts(Opts::new(
            "perpsentinel_cycle_duration_seconds",
            "Duration of the last completed cycle",
        ))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let cycles_total = CounterVec::new(
            Opts::new("perpsentinel_cycles_total", "Total cycles run, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("perpsentinel_orders_total", "Total orders submitted, by kind and result"),
            &["kind", "result"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let reattach_total = CounterVec::new(
            Opts::new("perpsentinel_reattach_total", "Sentinel TP/SL reattach attempts"),
            &["result"],
        )?;
        registry.register(Box::new(reattach_total.clone()))?;

        let agent_up = GaugeVec::new(
            Opts::new("perpsentinel_agent_up", "1 if the agent produced a decision recently, else 0"),
            &["agent_id"],
        )?;
        registry.register(Box::new(agent_up.clone()))?;

        let agent_last_decision_timestamp = GaugeVec::new(
            Opts::new(
                "perpsentinel_agent_last_decision_timestamp",
                "Unix timestamp of the agent's last decision",
            ),
            &["agent_id"],
        )?;
        registry.register(Box::new(agent_last_decision_timestamp.clone()))?;

        Ok(Self {
            registry: std::sync::Arc::new(registry),
            open_positions,
            position_value_usd,
            total_equity_usd,
            drawdown_current,
            kill_switch_active,
            circuit_breaker_status,
            cycle_duration_seconds,
            cycles_total,
            orders_total,
            reattach_total,
            agent_up,
            agent_last_decision_timestamp,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_error() {
        let metrics = Metrics::new().unwrap();
        metrics.open_positions.set(2.0);
        assert_eq!(metrics.open_positions.get(), 2.0);
    }
}
