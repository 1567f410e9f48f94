//! Configuration module. Structured env + JSON loading, organized by
//! domain (grounded in the teacher's `config` split by `broker_config`,
//! `risk_env_config`, `observability_config`).

mod agents_file;
mod gateway_config;
mod observability_config;
mod orchestrator_config;
mod risk_config;

pub use agents_file::load_agents_dir;
pub use gateway_config::GatewayEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use orchestrator_config::OrchestratorEnvConfig;
pub use risk_config::RiskEnvConfig;

use anyhow::Result;

/// Aggregates all sub-configs, matching the teacher's `Config::from_env`
/// composition shape.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayEnvConfig,
    pub risk: RiskEnvConfig,
    pub orchestrator: OrchestratorEnvConfig,
    pub observability: ObservabilityEnvConfig,
    pub agents_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            gateway: GatewayEnvConfig::from_env(),
            risk: RiskEnvConfig::from_env(),
            orchestrator: OrchestratorEnvConfig::from_env(),
            observability: ObservabilityEnvConfig::from_env(),
            agents_dir: std::env::var("AGENTS_DIR").unwrap_or_else(|_| "agents".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_succeeds_with_defaults() {
        let config = Config::from_env().expect("should parse with defaults");
        assert_eq!(config.orchestrator.cycle_cadence_secs, 60);
    }
}
