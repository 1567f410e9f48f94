//! Outcome Feedback (spec §4.O): when a position reaches CLOSED, resolves
//! its originating Decision via `decision_ref`, appends a `(decision,
//! outcome)` record, and feeds the Confidence Normalizer's rolling accuracy
//! window. Grounded in spec.md §4.O directly — the teacher has no direct
//! counterpart, so the shape follows `application::confidence`'s own
//! record-then-normalize style.

use crate::application::confidence::ConfidenceNormalizer;
use crate::domain::decision::Decision;
use crate::domain::position::{ExitReason, TradeOutcome};
use crate::infrastructure::persistence::records::LearningLogRow;

/// Resolves the decision that originated `outcome.decision_ref` out of the
/// cycle's in-memory decision log, records the outcome against the
/// Confidence Normalizer, and produces the row to append to
/// `learning_log.csv`. Returns `None` (and logs nothing) if the decision is
/// not found — this should not happen in practice since `decision_ref` is
/// generated at entry time from a live Decision, but the caller owns the
/// decision log's retention policy, so absence is handled rather than
/// panicked on.
pub fn resolve_outcome(
    outcome: &TradeOutcome,
    decisions: &[Decision],
    normalizer: &mut ConfidenceNormalizer,
    now: i64,
) -> Option<LearningLogRow> {
    let decision = decisions
        .iter()
        .find(|d| decision_ref(d) == outcome.decision_ref)?;

    let was_correct = matches!(outcome.exit_reason, ExitReason::Tp | ExitReason::Partial);
    normalizer.record_outcome(&decision.agent_id, was_correct);

    Some(LearningLogRow {
        ts: now,
        agent_id: decision.agent_id.clone(),
        symbol: decision.symbol.clone(),
        decision_ref: outcome.decision_ref.clone(),
        raw_signal: format!("{:?}", decision.raw_signal),
        normalized_confidence: decision.normalized_confidence,
        exit_reason: format!("{:?}", outcome.exit_reason),
        realized_pnl: outcome.realized_pnl,
        was_correct,
    })
}

/// Stable reference derived from a Decision, used as `Position.decision_ref`
/// at entry time. `(agent_id, symbol, timestamp)` is unique per cycle since
/// an agent emits at most one Decision per symbol per cycle.
pub fn decision_ref(decision: &Decision) -> String {
    format!("{}-{}-{}", decision.agent_id, decision.symbol, decision.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::domain::decision::Signal;

    fn decision(agent_id: &str, symbol: &str, ts: i64) -> Decision {
        Decision {
            timestamp: ts,
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            raw_signal: Signal::Long,
            raw_confidence: 0.8,
            normalized_confidence: 0.8,
            strategy_tag: "trend".to_string(),
            reasoning_text: String::new(),
            market_snapshot: serde_json::Value::Null,
        }
    }

    fn outcome(decision_ref: String, exit_reason: ExitReason) -> TradeOutcome {
        TradeOutcome {
            position_ref: "pos-1".to_string(),
            exit_reason,
            exit_price: dec!(105),
            realized_pnl: dec!(50),
            hold_duration_secs: 3600,
            market_snapshot_at_exit: serde_json::Value::Null,
            decision_ref,
        }
    }

    #[test]
    fn tp_exit_is_recorded_as_correct() {
        let d = decision("a1", "BTCUSDT", 1000);
        let dref = decision_ref(&d);
        let decisions = vec![d];
        let mut normalizer = ConfidenceNormalizer::new();

        let row = resolve_outcome(&outcome(dref, ExitReason::Tp), &decisions, &mut normalizer, 2000)
            .expect("decision should resolve");
        assert!(row.was_correct);
        assert_eq!(row.agent_id, "a1");
    }

    #[test]
    fn sl_exit_is_recorded_as_incorrect() {
        let d = decision("a1", "BTCUSDT", 1000);
        let dref = decision_ref(&d);
        let decisions = vec![d];
        let mut normalizer = ConfidenceNormalizer::new();

        let row = resolve_outcome(&outcome(dref, ExitReason::Sl), &decisions, &mut normalizer, 2000)
            .expect("decision should resolve");
        assert!(!row.was_correct);
    }

    #[test]
    fn unknown_decision_ref_resolves_to_none() {
        let decisions = vec![decision("a1", "BTCUSDT", 1000)];
        let mut normalizer = ConfidenceNormalizer::new();
        let result = resolve_outcome(
            &outcome("missing-ref".to_string(), ExitReason::Tp),
            &decisions,
            &mut normalizer,
            2000,
        );
        assert!(result.is_none());
    }

    #[test]
    fn feeds_confidence_normalizer_accuracy_window() {
        let d = decision("a1", "BTCUSDT", 1000);
        let dref = decision_ref(&d);
        let decisions = vec![d];
        let mut normalizer = ConfidenceNormalizer::new();

        resolve_outcome(&outcome(dref, ExitReason::Tp), &decisions, &mut normalizer, 2000);
        let normalized = normalizer.normalize(
            "a1",
            0.8,
            &crate::application::regime::RegimeOutput {
                regime: crate::application::regime::Regime::Normal,
                vr: dec!(1.0),
                confidence_delta: 0.0,
                size_multiplier: dec!(1.0),
                tp_atr_multiplier: dec!(2.2),
                sl_atr_multiplier: dec!(1.1),
            },
        );
        // single correct outcome -> accuracy=1.0 -> multiplier 1.5, clamped to 1.0.
        assert_eq!(normalized, 1.0);
    }
}
