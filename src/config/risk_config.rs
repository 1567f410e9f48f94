//! Risk engine / kill-switch configuration parsing (spec §4.G).

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub risk_fraction: Decimal,
    pub risk_fraction_ceiling: Decimal,
    pub max_margin_per_trade: Decimal,
    pub min_margin_per_trade: Decimal,
    pub max_leverage: u32,
    pub max_positions_per_symbol: u32,
    pub max_daily_loss_pct: Decimal,
    pub max_drawdown: Decimal,
    pub consecutive_loss_limit: u32,
    pub max_avg_latency_ms: u64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Self {
        Self {
            risk_fraction: Self::parse_decimal("RISK_FRACTION", "0.025"),
            risk_fraction_ceiling: Self::parse_decimal("RISK_FRACTION_CEILING", "0.03"),
            max_margin_per_trade: Self::parse_decimal("MAX_MARGIN_PER_TRADE", "600"),
            min_margin_per_trade: Self::parse_decimal("MIN_MARGIN_PER_TRADE", "600"),
            max_leverage: env::var("MAX_LEVERAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            max_positions_per_symbol: env::var("MAX_POSITIONS_PER_SYMBOL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            max_daily_loss_pct: Self::parse_decimal("MAX_DAILY_LOSS_PCT", "0.05"),
            max_drawdown: Self::parse_decimal("MAX_DRAWDOWN", "0.25"),
            consecutive_loss_limit: env::var("CONSECUTIVE_LOSS_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            max_avg_latency_ms: env::var("MAX_AVG_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
        }
    }

    fn parse_decimal(key: &str, default: &str) -> Decimal {
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(Decimal::from_f64)
            .unwrap_or_else(|| default.parse().expect("default is a valid decimal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_spec() {
        let cfg = RiskEnvConfig::from_env();
        assert_eq!(cfg.risk_fraction, dec!(0.025));
        assert_eq!(cfg.risk_fraction_ceiling, dec!(0.03));
        assert_eq!(cfg.max_margin_per_trade, dec!(600));
        assert_eq!(cfg.max_leverage, 2);
        assert_eq!(cfg.max_positions_per_symbol, 3);
        assert_eq!(cfg.max_drawdown, dec!(0.25));
    }
}
