//! Observability configuration parsing (grounded in the teacher's
//! `config/observability_config.rs`).

use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub report_interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("OBSERVABILITY_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            report_interval_secs: env::var("OBSERVABILITY_REPORT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enabled_with_60s_interval() {
        let cfg = ObservabilityEnvConfig::from_env();
        assert!(cfg.enabled);
        assert_eq!(cfg.report_interval_secs, 60);
    }
}
