//! Cycle cadence and cooldown configuration (spec §4.I, §4.M).

use std::env;

#[derive(Debug, Clone)]
pub struct OrchestratorEnvConfig {
    pub cycle_cadence_secs: u64,
    pub cycle_timeout_secs: u64,
    pub reversal_cooldown_secs: i64,
    pub equity_reconciliation_every_n_cycles: u64,
    pub csv_flush_every_n_cycles: u64,
    pub live_monitor_poll_secs: u64,
    pub sentinel_poll_secs: u64,
    pub data_dir: String,
}

impl OrchestratorEnvConfig {
    pub fn from_env() -> Self {
        Self {
            cycle_cadence_secs: Self::parse_u64("CYCLE_CADENCE_SECS", 60),
            cycle_timeout_secs: Self::parse_u64("CYCLE_TIMEOUT_SECS", 90),
            reversal_cooldown_secs: Self::parse_u64("REVERSAL_COOLDOWN_SECS", 600) as i64,
            equity_reconciliation_every_n_cycles: Self::parse_u64(
                "EQUITY_RECONCILIATION_EVERY_N_CYCLES",
                10,
            ),
            csv_flush_every_n_cycles: Self::parse_u64("CSV_FLUSH_EVERY_N_CYCLES", 7),
            live_monitor_poll_secs: Self::parse_u64("LIVE_MONITOR_POLL_SECS", 5),
            sentinel_poll_secs: Self::parse_u64("SENTINEL_POLL_SECS", 60),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        }
    }

    fn parse_u64(key: &str, default: u64) -> u64 {
        env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_cadence() {
        let cfg = OrchestratorEnvConfig::from_env();
        assert_eq!(cfg.cycle_cadence_secs, 60);
        assert_eq!(cfg.cycle_timeout_secs, 90);
        assert_eq!(cfg.reversal_cooldown_secs, 600);
        assert_eq!(cfg.equity_reconciliation_every_n_cycles, 10);
        assert_eq!(cfg.csv_flush_every_n_cycles, 7);
    }
}
