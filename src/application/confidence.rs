//! Confidence Normalizer (spec §4.F): rolling per-agent accuracy over the
//! last 20 decisions, scaling raw confidence before arbitration.

use std::collections::{HashMap, VecDeque};

use crate::application::regime::RegimeOutput;

const WINDOW: usize = 20;

#[derive(Debug, Default)]
pub struct ConfidenceNormalizer {
    history: HashMap<String, VecDeque<bool>>,
}

impl ConfidenceNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records whether the agent's most recent resolved decision was
    /// correct (fed by Outcome Feedback, spec §4.O).
    pub fn record_outcome(&mut self, agent_id: &str, was_correct: bool) {
        let window = self.history.entry(agent_id.to_string()).or_default();
        window.push_back(was_correct);
        if window.len() > WINDOW {
            window.pop_front();
        }
    }

    fn accuracy(&self, agent_id: &str) -> Option<f64> {
        let window = self.history.get(agent_id)?;
        if window.is_empty() {
            return None;
        }
        let correct = window.iter().filter(|&&c| c).count();
        Some(correct as f64 / window.len() as f64)
    }

    /// `normalized = raw × (0.5 + accuracy)` clipped to `[0, 1]`; an agent
    /// with zero history uses a 1.0 multiplier. The regime's
    /// `confidence_delta` is then applied additively and the result
    /// re-clipped (spec §4.F).
    pub fn normalize(&self, agent_id: &str, raw_confidence: f64, regime: &RegimeOutput) -> f64 {
        let multiplier = match self.accuracy(agent_id) {
            Some(accuracy) => 0.5 + accuracy,
            None => 1.0,
        };
        let scaled = (raw_confidence * multiplier).clamp(0.0, 1.0);
        (scaled + regime.confidence_delta).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn normal_regime() -> RegimeOutput {
        use crate::application::regime::Regime;
        RegimeOutput {
            regime: Regime::Normal,
            vr: dec!(1.0),
            confidence_delta: 0.0,
            size_multiplier: dec!(1.0),
            tp_atr_multiplier: dec!(2.2),
            sl_atr_multiplier: dec!(1.1),
        }
    }

    #[test]
    fn zero_history_uses_unit_multiplier() {
        let normalizer = ConfidenceNormalizer::new();
        let normalized = normalizer.normalize("a1", 0.8, &normal_regime());
        assert_eq!(normalized, 0.8);
    }

    #[test]
    fn perfect_accuracy_scales_up_toward_cap() {
        let mut normalizer = ConfidenceNormalizer::new();
        for _ in 0..20 {
            normalizer.record_outcome("a1", true);
        }
        // accuracy=1.0 -> multiplier=1.5 -> 0.8*1.5=1.2 clipped to 1.0
        let normalized = normalizer.normalize("a1", 0.8, &normal_regime());
        assert_eq!(normalized, 1.0);
    }

    #[test]
    fn zero_accuracy_scales_down_by_half() {
        let mut normalizer = ConfidenceNormalizer::new();
        for _ in 0..20 {
            normalizer.record_outcome("a1", false);
        }
        // accuracy=0.0 -> multiplier=0.5 -> 0.8*0.5=0.4
        let normalized = normalizer.normalize("a1", 0.8, &normal_regime());
        assert_eq!(normalized, 0.4);
    }

    #[test]
    fn window_caps_at_20_most_recent() {
        let mut normalizer = ConfidenceNormalizer::new();
        for _ in 0..15 {
            normalizer.record_outcome("a1", false);
        }
        for _ in 0..20 {
            normalizer.record_outcome("a1", true);
        }
        assert_eq!(normalizer.accuracy("a1"), Some(1.0));
    }

    #[test]
    fn regime_confidence_delta_applies_additively() {
        use crate::application::regime::Regime;
        let high_regime = RegimeOutput {
            regime: Regime::High,
            vr: dec!(1.3),
            confidence_delta: -0.03,
            size_multiplier: dec!(0.75),
            tp_atr_multiplier: dec!(2.5),
            sl_atr_multiplier: dec!(1.25),
        };
        let normalizer = ConfidenceNormalizer::new();
        let normalized = normalizer.normalize("a1", 0.5, &high_regime);
        assert!((normalized - 0.47).abs() < 1e-9);
    }
}
