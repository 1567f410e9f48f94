//! Exchange gateway configuration parsing from environment variables
//! (spec §4.A, §6).

use std::env;

#[derive(Debug, Clone)]
pub struct GatewayEnvConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl GatewayEnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),
            base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://fapi.binance.com".to_string()),
            request_timeout_secs: env::var("EXCHANGE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}
