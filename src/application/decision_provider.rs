//! Cache-aware adapter in front of the opaque `DecisionProvider` (spec §4.D):
//! reuses the previous decision for an (agent, symbol) pair when it was
//! high-confidence and recent, instead of calling the upstream oracle every
//! cycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::decision::Decision;
use crate::domain::errors::DecisionError;
use crate::domain::ports::DecisionProvider;

const CACHE_CONFIDENCE_THRESHOLD: f64 = 0.8;
const CACHE_MAX_CYCLE_AGE: u64 = 4;

struct CachedDecision {
    decision: Decision,
    issued_cycle: u64,
}

/// Wraps a `DecisionProvider` with the spec's reuse rule. Never mutates the
/// inner provider's state; only this adapter's own cache.
pub struct CachingDecisionProvider {
    inner: Arc<dyn DecisionProvider>,
    cache: Mutex<HashMap<(String, String), CachedDecision>>,
}

impl CachingDecisionProvider {
    pub fn new(inner: Arc<dyn DecisionProvider>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached decision if it is `confidence ≥ 0.8` and was
    /// issued within the last `CACHE_MAX_CYCLE_AGE` cycles; otherwise calls
    /// the underlying provider and refreshes the cache on success.
    pub async fn decide(
        &self,
        agent_id: &str,
        symbol: &str,
        market_snapshot: &serde_json::Value,
        recent_performance: f64,
        current_cycle: u64,
    ) -> Result<Decision, DecisionError> {
        let key = (agent_id.to_string(), symbol.to_string());

        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&key)
                && cached.decision.normalized_confidence >= CACHE_CONFIDENCE_THRESHOLD
                && current_cycle.saturating_sub(cached.issued_cycle) <= CACHE_MAX_CYCLE_AGE
            {
                return Ok(cached.decision.clone());
            }
        }

        let decision = self
            .inner
            .decide(agent_id, symbol, market_snapshot, recent_performance)
            .await?;

        self.cache.lock().await.insert(
            key,
            CachedDecision {
                decision: decision.clone(),
                issued_cycle: current_cycle,
            },
        );
        Ok(decision)
    }
}
