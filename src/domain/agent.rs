//! Strategy agent identity (spec §3 "Agent").
//!
//! Agents are read-only from the core's point of view: `base_weight` and
//! `performance_multiplier` are mutated by the (out-of-scope) optimizer, not
//! by anything in this crate.

use serde::{Deserialize, Serialize};

pub const MIN_WEIGHT: f64 = 0.7;
pub const MAX_WEIGHT: f64 = 1.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub symbol: String,
    pub style_tag: String,
    pub base_weight: f64,
    #[serde(default = "default_multiplier")]
    pub performance_multiplier: f64,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Agent {
    /// `base_weight × performance_multiplier`, clamped to `[MIN_WEIGHT, MAX_WEIGHT]`.
    pub fn final_weight(&self) -> f64 {
        (self.base_weight * self.performance_multiplier).clamp(MIN_WEIGHT, MAX_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(base_weight: f64, multiplier: f64) -> Agent {
        Agent {
            agent_id: "a1".to_string(),
            symbol: "BTCUSDT".to_string(),
            style_tag: "trend".to_string(),
            base_weight,
            performance_multiplier: multiplier,
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn final_weight_multiplies_base_and_multiplier() {
        assert_eq!(agent(1.0, 1.0).final_weight(), 1.0);
    }

    #[test]
    fn final_weight_clamps_above_max() {
        assert_eq!(agent(1.3, 1.3).final_weight(), MAX_WEIGHT);
    }

    #[test]
    fn final_weight_clamps_below_min() {
        assert_eq!(agent(0.7, 0.5).final_weight(), MIN_WEIGHT);
    }
}
