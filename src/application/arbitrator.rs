//! Signal Arbitrator (spec §4.E): aggregates per-symbol agent Decisions into
//! one `ArbitratedIntent` per (symbol, cycle).

use crate::domain::agent::Agent;
use crate::domain::decision::{ArbitratedIntent, Decision, Signal};

/// `score(side) = Σ normalized_confidence(d) × final_weight(d.agent)` over
/// decisions with `raw_signal = side`. Ties within `1e-9` break
/// `LONG > SHORT > HOLD`; otherwise the highest score wins. If both LONG and
/// SHORT are non-zero and within 15% of the larger, the arbitrator reports a
/// conflict and outputs HOLD (spec §4.E).
pub fn arbitrate(symbol: &str, decisions: &[Decision], agents: &[Agent]) -> ArbitratedIntent {
    let weight_for = |agent_id: &str| -> f64 {
        agents
            .iter()
            .find(|a| a.agent_id == agent_id)
            .map(|a| a.final_weight())
            .unwrap_or(1.0)
    };

    let mut score_long = 0.0;
    let mut score_short = 0.0;
    let mut score_hold = 0.0;
    let mut contributors_long = Vec::new();
    let mut contributors_short = Vec::new();
    let mut contributors_hold = Vec::new();

    for d in decisions {
        let contribution = d.normalized_confidence * weight_for(&d.agent_id);
        match d.raw_signal {
            Signal::Long => {
                score_long += contribution;
                contributors_long.push(d.agent_id.clone());
            }
            Signal::Short => {
                score_short += contribution;
                contributors_short.push(d.agent_id.clone());
            }
            Signal::Hold => {
                score_hold += contribution;
                contributors_hold.push(d.agent_id.clone());
            }
        }
    }

    // Conflict detection: both sides non-zero and within 15% of the max.
    if score_long > 0.0 && score_short > 0.0 {
        let max_score = score_long.max(score_short);
        if (score_long - score_short).abs() < 0.15 * max_score {
            return ArbitratedIntent {
                symbol: symbol.to_string(),
                side: Signal::Hold,
                aggregate_score: score_hold,
                contributing_agents: contributors_hold,
            };
        }
    }

    let (side, score, contributors) = arg_max_with_tiebreak(
        (Signal::Long, score_long, contributors_long),
        (Signal::Short, score_short, contributors_short),
        (Signal::Hold, score_hold, contributors_hold),
    );

    ArbitratedIntent {
        symbol: symbol.to_string(),
        side,
        aggregate_score: score,
        contributing_agents: contributors,
    }
}

/// arg max(LONG, SHORT, HOLD) with tie-break order LONG > SHORT > HOLD only
/// when scores differ by less than 1e-9; a tie NOT broken this way resolves
/// to HOLD (spec §4.E: "otherwise HOLD on ties").
fn arg_max_with_tiebreak(
    long: (Signal, f64, Vec<String>),
    short: (Signal, f64, Vec<String>),
    hold: (Signal, f64, Vec<String>),
) -> (Signal, f64, Vec<String>) {
    const EPS: f64 = 1e-9;
    let candidates = [long, short, hold];
    let max_score = candidates.iter().map(|c| c.1).fold(f64::MIN, f64::max);

    let within_eps: Vec<&(Signal, f64, Vec<String>)> =
        candidates.iter().filter(|c| (c.1 - max_score).abs() < EPS).collect();

    if within_eps.len() == 1 {
        return within_eps[0].clone();
    }

    // Multiple candidates tie within EPS: prefer LONG > SHORT > HOLD.
    for preferred in [Signal::Long, Signal::Short, Signal::Hold] {
        if let Some(c) = within_eps.iter().find(|c| c.0 == preferred) {
            return (*c).clone();
        }
    }

    hold_fallback(candidates)
}

fn hold_fallback(candidates: [(Signal, f64, Vec<String>); 3]) -> (Signal, f64, Vec<String>) {
    candidates
        .into_iter()
        .find(|c| c.0 == Signal::Hold)
        .expect("HOLD candidate always present")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(agent_id: &str, signal: Signal, confidence: f64) -> Decision {
        Decision {
            timestamp: 0,
            agent_id: agent_id.to_string(),
            symbol: "BNBUSDT".to_string(),
            raw_signal: signal,
            raw_confidence: confidence,
            normalized_confidence: confidence,
            strategy_tag: "test".to_string(),
            reasoning_text: String::new(),
            market_snapshot: serde_json::Value::Null,
        }
    }

    fn agent(agent_id: &str, weight: f64) -> Agent {
        Agent {
            agent_id: agent_id.to_string(),
            symbol: "BNBUSDT".to_string(),
            style_tag: "trend".to_string(),
            base_weight: weight,
            performance_multiplier: 1.0,
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn s5_conflicting_agents_produce_hold() {
        // spec S5: LONG@0.8, SHORT@0.75, HOLD@0.6, all weight 1.0.
        let decisions = vec![
            decision("a1", Signal::Long, 0.8),
            decision("a2", Signal::Short, 0.75),
            decision("a3", Signal::Hold, 0.6),
        ];
        let agents = vec![agent("a1", 1.0), agent("a2", 1.0), agent("a3", 1.0)];
        let intent = arbitrate("BNBUSDT", &decisions, &agents);
        assert_eq!(intent.side, Signal::Hold);
    }

    #[test]
    fn clear_long_majority_wins() {
        let decisions = vec![
            decision("a1", Signal::Long, 0.9),
            decision("a2", Signal::Short, 0.2),
        ];
        let agents = vec![agent("a1", 1.0), agent("a2", 1.0)];
        let intent = arbitrate("BTCUSDT", &decisions, &agents);
        assert_eq!(intent.side, Signal::Long);
    }

    #[test]
    fn exact_tie_between_long_and_short_is_a_conflict() {
        let decisions = vec![
            decision("a1", Signal::Long, 0.5),
            decision("a2", Signal::Short, 0.5),
        ];
        let agents = vec![agent("a1", 1.0), agent("a2", 1.0)];
        // |0.5 - 0.5| = 0 < 0.15*0.5 -> conflict detected -> HOLD.
        let intent = arbitrate("ETHUSDT", &decisions, &agents);
        assert_eq!(intent.side, Signal::Hold);
    }

    #[test]
    fn exact_tie_between_long_and_hold_breaks_to_long() {
        // No SHORT present, so the 15%-conflict rule never engages; the
        // eps tie-break order (LONG > SHORT > HOLD) applies directly.
        let decisions = vec![
            decision("a1", Signal::Long, 0.5),
            decision("a2", Signal::Hold, 0.5),
        ];
        let agents = vec![agent("a1", 1.0), agent("a2", 1.0)];
        let intent = arbitrate("ETHUSDT", &decisions, &agents);
        assert_eq!(intent.side, Signal::Long);
    }

    #[test]
    fn all_hold_produces_hold_with_zero_score_contributors() {
        let decisions = vec![decision("a1", Signal::Hold, 0.3)];
        let agents = vec![agent("a1", 1.0)];
        let intent = arbitrate("SOLUSDT", &decisions, &agents);
        assert_eq!(intent.side, Signal::Hold);
        assert_eq!(intent.contributing_agents, vec!["a1".to_string()]);
    }

    #[test]
    fn unknown_agent_defaults_to_unit_weight() {
        let decisions = vec![decision("ghost", Signal::Long, 0.9)];
        let intent = arbitrate("BTCUSDT", &decisions, &[]);
        assert_eq!(intent.side, Signal::Long);
        assert_eq!(intent.aggregate_score, 0.9);
    }
}
