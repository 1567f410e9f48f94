//! Kill-switch ladder (spec §4.G): four ordered checks, the first that
//! fires halts all new entries for the process (exits are unaffected).

use rust_decimal::Decimal;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    pub max_daily_loss_pct: Decimal,
    pub max_drawdown: Decimal,
    pub consecutive_loss_limit: u32,
    pub max_avg_latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct KillSwitchInputs {
    pub starting_equity: Decimal,
    pub daily_realized_pnl: Decimal,
    pub drawdown_from_peak: Decimal,
    pub consecutive_losses: u32,
    pub recent_call_latencies_ms: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSwitchTrip {
    DailyLoss,
    Drawdown,
    ConsecutiveLosses,
    Latency,
}

/// Evaluates the four checks in spec order, short-circuiting on the first
/// one that fires.
pub fn check(config: &KillSwitchConfig, inputs: &KillSwitchInputs) -> Option<KillSwitchTrip> {
    if inputs.starting_equity > Decimal::ZERO {
        let loss_pct = -inputs.daily_realized_pnl / inputs.starting_equity;
        if loss_pct >= config.max_daily_loss_pct {
            warn!(%loss_pct, limit = %config.max_daily_loss_pct, "kill-switch: daily loss limit breached");
            return Some(KillSwitchTrip::DailyLoss);
        }
    }

    if inputs.drawdown_from_peak >= config.max_drawdown {
        warn!(
            drawdown = %inputs.drawdown_from_peak,
            limit = %config.max_drawdown,
            "kill-switch: drawdown limit breached"
        );
        return Some(KillSwitchTrip::Drawdown);
    }

    if inputs.consecutive_losses >= config.consecutive_loss_limit {
        warn!(
            consecutive_losses = inputs.consecutive_losses,
            limit = config.consecutive_loss_limit,
            "kill-switch: consecutive loss limit breached"
        );
        return Some(KillSwitchTrip::ConsecutiveLosses);
    }

    if !inputs.recent_call_latencies_ms.is_empty() {
        let window: Vec<u64> = inputs
            .recent_call_latencies_ms
            .iter()
            .rev()
            .take(20)
            .copied()
            .collect();
        let avg = window.iter().sum::<u64>() / window.len() as u64;
        if avg > config.max_avg_latency_ms {
            warn!(avg_latency_ms = avg, limit = config.max_avg_latency_ms, "kill-switch: latency limit breached");
            return Some(KillSwitchTrip::Latency);
        }
    }

    None
}

/// Process-wide latch around the stateless ladder above. `check()` alone
/// re-evaluates drawdown fresh every cycle, so a later equity recovery (e.g.
/// unrealized PnL swinging back) would clear a drawdown trip it should not
/// clear (spec.md:274 "Kill-switch monotonicity"): once drawdown ≥ max
/// trips, no new entries succeed for the rest of the run, recovery or not,
/// until an explicit manual reset. Daily-loss, consecutive-loss, and latency
/// trips are not latched — they are expected to clear when their underlying
/// condition clears.
#[derive(Debug, Default)]
pub struct KillSwitchState {
    drawdown_latched: bool,
}

impl KillSwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, config: &KillSwitchConfig, inputs: &KillSwitchInputs) -> Option<KillSwitchTrip> {
        if self.drawdown_latched {
            return Some(KillSwitchTrip::Drawdown);
        }
        let trip = check(config, inputs);
        if trip == Some(KillSwitchTrip::Drawdown) {
            self.drawdown_latched = true;
        }
        trip
    }

    /// Manual reset (spec.md:274 "... or manual reset"). Not wired to any
    /// automatic trigger; an operator action for a fresh run.
    pub fn reset(&mut self) {
        self.drawdown_latched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> KillSwitchConfig {
        KillSwitchConfig {
            max_daily_loss_pct: dec!(0.05),
            max_drawdown: dec!(0.25),
            consecutive_loss_limit: 3,
            max_avg_latency_ms: 5000,
        }
    }

    fn calm_inputs() -> KillSwitchInputs {
        KillSwitchInputs {
            starting_equity: dec!(10000),
            daily_realized_pnl: dec!(0),
            drawdown_from_peak: dec!(0),
            consecutive_losses: 0,
            recent_call_latencies_ms: vec![],
        }
    }

    #[test]
    fn calm_state_does_not_trip() {
        assert_eq!(check(&config(), &calm_inputs()), None);
    }

    #[test]
    fn daily_loss_trips_first() {
        let mut inputs = calm_inputs();
        inputs.daily_realized_pnl = dec!(-600); // 6% loss > 5% limit
        inputs.drawdown_from_peak = dec!(0.9); // would also trip, but daily loss checked first
        assert_eq!(check(&config(), &inputs), Some(KillSwitchTrip::DailyLoss));
    }

    #[test]
    fn drawdown_trips_when_daily_loss_is_fine() {
        let mut inputs = calm_inputs();
        inputs.drawdown_from_peak = dec!(0.3);
        assert_eq!(check(&config(), &inputs), Some(KillSwitchTrip::Drawdown));
    }

    #[test]
    fn three_consecutive_losses_trip() {
        let mut inputs = calm_inputs();
        inputs.consecutive_losses = 3;
        assert_eq!(check(&config(), &inputs), Some(KillSwitchTrip::ConsecutiveLosses));
    }

    #[test]
    fn average_latency_over_5s_trips() {
        let mut inputs = calm_inputs();
        inputs.recent_call_latencies_ms = vec![6000; 20];
        assert_eq!(check(&config(), &inputs), Some(KillSwitchTrip::Latency));
    }

    #[test]
    fn latency_window_only_considers_last_20_calls() {
        let mut inputs = calm_inputs();
        let mut latencies = vec![100; 50];
        latencies.extend(vec![6000; 20]);
        inputs.recent_call_latencies_ms = latencies;
        // last 20 are the high ones -> trips
        assert_eq!(check(&config(), &inputs), Some(KillSwitchTrip::Latency));
    }

    #[test]
    fn drawdown_latch_stays_tripped_after_equity_recovers() {
        let mut state = KillSwitchState::new();
        let mut inputs = calm_inputs();
        inputs.drawdown_from_peak = dec!(0.3);
        assert_eq!(state.evaluate(&config(), &inputs), Some(KillSwitchTrip::Drawdown));

        // equity recovers back above the threshold the next cycle
        inputs.drawdown_from_peak = dec!(0.0);
        assert_eq!(state.evaluate(&config(), &inputs), Some(KillSwitchTrip::Drawdown));
    }

    #[test]
    fn drawdown_latch_clears_on_manual_reset() {
        let mut state = KillSwitchState::new();
        let mut inputs = calm_inputs();
        inputs.drawdown_from_peak = dec!(0.3);
        assert_eq!(state.evaluate(&config(), &inputs), Some(KillSwitchTrip::Drawdown));

        state.reset();
        inputs.drawdown_from_peak = dec!(0.0);
        assert_eq!(state.evaluate(&config(), &inputs), None);
    }

    #[test]
    fn non_drawdown_trips_are_not_latched() {
        let mut state = KillSwitchState::new();
        let mut inputs = calm_inputs();
        inputs.consecutive_losses = 3;
        assert_eq!(state.evaluate(&config(), &inputs), Some(KillSwitchTrip::ConsecutiveLosses));

        inputs.consecutive_losses = 0;
        assert_eq!(state.evaluate(&config(), &inputs), None);
    }
}
