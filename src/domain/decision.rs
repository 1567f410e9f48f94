//! Decision and arbitration types (spec §3 "Decision", "Arbitrated Intent").

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Tagged variant, never a free string (spec §9 "Dynamic-typed decisions →
/// sum types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    Hold,
}

impl Signal {
    pub fn is_directional(self) -> bool {
        matches!(self, Signal::Long | Signal::Short)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: i64,
    pub agent_id: String,
    pub symbol: String,
    pub raw_signal: Signal,
    pub raw_confidence: f64,
    pub normalized_confidence: f64,
    pub strategy_tag: String,
    pub reasoning_text: String,
    pub market_snapshot: serde_json::Value,
}

/// Per symbol per cycle; invariant: only one intent per (symbol, cycle),
/// enforced by the arbitrator always producing exactly one `ArbitratedIntent`
/// per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratedIntent {
    pub symbol: String,
    pub side: Signal,
    pub aggregate_score: f64,
    pub contributing_agents: Vec<String>,
}

impl ArbitratedIntent {
    pub fn hold(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: Signal::Hold,
            aggregate_score: 0.0,
            contributing_agents: Vec::new(),
        }
    }
}

/// Confidence at decision time, used by the Risk Engine for sizing; kept as
/// `Decimal` at the sizing boundary even though decisions themselves carry
/// `f64` confidence (matching spec §4.D/§4.G's mixed-precision boundary).
pub fn confidence_as_decimal(confidence: f64) -> Decimal {
    Decimal::from_f64_retain(confidence).unwrap_or(Decimal::ZERO)
}
