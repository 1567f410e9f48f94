//! Placeholder `DecisionProvider` (spec §1/§4.D: the AI/LLM decision source
//! is explicitly out of scope, interface-only). Always reports HOLD with
//! zero confidence so the control plane is runnable end-to-end without an
//! upstream oracle wired in; a real deployment swaps this out for an
//! in-process model call or an RPC client behind the same trait.

use async_trait::async_trait;

use crate::domain::decision::{Decision, Signal};
use crate::domain::errors::DecisionError;
use crate::domain::ports::DecisionProvider;

pub struct StubDecisionProvider;

#[async_trait]
impl DecisionProvider for StubDecisionProvider {
    async fn decide(
        &self,
        agent_id: &str,
        symbol: &str,
        market_snapshot: &serde_json::Value,
        _recent_performance: f64,
    ) -> Result<Decision, DecisionError> {
        Ok(Decision {
            timestamp: 0,
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            raw_signal: Signal::Hold,
            raw_confidence: 0.0,
            normalized_confidence: 0.0,
            strategy_tag: "stub".to_string(),
            reasoning_text: "no decision source wired in".to_string(),
            market_snapshot: market_snapshot.clone(),
        })
    }
}
