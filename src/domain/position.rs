//! Position, its lifecycle state machine, trade outcomes, equity snapshots,
//! per-symbol mutex state and circuit-breaker state (spec §3, §4.J).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::domain::decision::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Monitoring,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Signal,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub opened_at: i64,
    pub state: PositionState,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub tpsl_hash: Option<String>,
    pub partial_close_done: bool,
    pub decision_ref: String,
    /// TP/SL fractions used at entry, kept so the Sentinel can recompute the
    /// same geometry on reattach without re-deriving it from a possibly
    /// different current regime (spec §4.L step 3).
    pub tp_frac: Decimal,
    pub sl_frac: Decimal,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        side: Signal,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
        opened_at: i64,
        decision_ref: String,
        tp_frac: Decimal,
        sl_frac: Decimal,
    ) -> Self {
        Self {
            symbol,
            side,
            quantity,
            entry_price,
            leverage,
            opened_at,
            state: PositionState::Open,
            tp_order_id: None,
            sl_order_id: None,
            tpsl_hash: None,
            partial_close_done: false,
            decision_ref,
            tp_frac,
            sl_frac,
        }
    }

    /// Both TP and SL acknowledged: the only legal way into MONITORING.
    pub fn mark_monitoring(&mut self, tp_order_id: String, sl_order_id: String, hash: String) {
        self.tp_order_id = Some(tp_order_id);
        self.sl_order_id = Some(sl_order_id);
        self.tpsl_hash = Some(hash);
        self.state = PositionState::Monitoring;
    }

    /// Emergency or exit-initiated transition into CLOSING. Legal from OPEN
    /// (e.g. `InvalidTpslGeometry`) or MONITORING (exit observed).
    pub fn mark_closing(&mut self) -> Result<(), StateMachineError> {
        match self.state {
            PositionState::Open | PositionState::Monitoring => {
                self.state = PositionState::Closing;
                Ok(())
            }
            PositionState::Closing => Ok(()), // idempotent
            PositionState::Closed => Err(StateMachineError::IllegalTransition {
                from: self.state,
                to: PositionState::Closing,
            }),
        }
    }

    /// Terminal transition, legal only once venue position_size = 0 is
    /// confirmed from CLOSING.
    pub fn mark_closed(&mut self) -> Result<(), StateMachineError> {
        match self.state {
            PositionState::Closing => {
                self.state = PositionState::Closed;
                Ok(())
            }
            other => Err(StateMachineError::IllegalTransition {
                from: other,
                to: PositionState::Closed,
            }),
        }
    }

    pub fn has_both_legs(&self) -> bool {
        self.tp_order_id.is_some() && self.sl_order_id.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition { from: PositionState, to: PositionState },
}

/// `{position_ref, exit_reason, exit_price, realized_pnl, hold_duration,
/// market_snapshot_at_exit}` (spec §3 "Trade Outcome").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_ref: String,
    pub exit_reason: ExitReason,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub hold_duration_secs: i64,
    pub market_snapshot_at_exit: serde_json::Value,
    pub decision_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Tp,
    Sl,
    Manual,
    Partial,
    Forced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: i64,
    pub realized_cum: Decimal,
    pub unrealized: Decimal,
    pub total_equity: Decimal,
    pub drawdown_from_peak: Decimal,
}

/// `{symbol, last_entry_time, last_entry_side, last_exit_time,
/// consecutive_losses, reattach_last_attempt, reattach_cycle_count}`
/// (spec §3 "Per-Symbol Mutex State"). Owned by the orchestrator/order
/// manager for entry gating and by the Sentinel for reattach debounce.
#[derive(Debug, Clone)]
pub struct SymbolMutexState {
    pub symbol: String,
    pub last_entry_time: Option<i64>,
    pub last_entry_side: Option<Signal>,
    pub last_exit_time: Option<i64>,
    pub consecutive_losses: u32,
    pub reattach_last_attempt: Option<Instant>,
    pub reattach_cycle_count: u64,
    last_conflict_log: Option<Instant>,
    last_exit_attempt: Option<Instant>,
}

impl SymbolMutexState {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            last_entry_time: None,
            last_entry_side: None,
            last_exit_time: None,
            consecutive_losses: 0,
            reattach_last_attempt: None,
            reattach_cycle_count: 0,
            last_conflict_log: None,
            last_exit_attempt: None,
        }
    }

    /// 15-min same-direction cooldown (900s); `reversal_cooldown` opposite
    /// direction (default 600s). (spec §4.I step 1)
    pub fn entry_allowed(&self, now: i64, side: Signal, reversal_cooldown_secs: i64) -> bool {
        match (self.last_entry_time, self.last_entry_side) {
            (Some(last_time), Some(last_side)) => {
                let elapsed = now - last_time;
                if last_side == side {
                    elapsed >= 900
                } else {
                    elapsed >= reversal_cooldown_secs
                }
            }
            _ => true,
        }
    }

    pub fn record_entry(&mut self, now: i64, side: Signal) {
        self.last_entry_time = Some(now);
        self.last_entry_side = Some(side);
    }

    pub fn record_exit(&mut self, now: i64, was_loss: bool) {
        self.last_exit_time = Some(now);
        if was_loss {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }

    /// Duplicate-conflict log debounce window (2.5s, spec §4.I step 2).
    pub fn should_log_conflict(&mut self, now: Instant) -> bool {
        let should_log = match self.last_conflict_log {
            Some(last) => now.duration_since(last).as_secs_f64() >= 2.5,
            None => true,
        };
        if should_log {
            self.last_conflict_log = Some(now);
        }
        should_log
    }

    /// Exit-attempt debounce: 5s, per position (spec §4.J).
    pub fn is_exit_allowed(&self, now: Instant) -> bool {
        match self.last_exit_attempt {
            Some(last) => now.duration_since(last).as_secs_f64() >= 5.0,
            None => true,
        }
    }

    pub fn record_exit_attempt(&mut self, now: Instant) {
        self.last_exit_attempt = Some(now);
    }

    /// Sentinel dual-layer debounce: at least 60s wall-clock AND at least 3
    /// sentinel cycles since the last attempt (spec §4.L step 1).
    pub fn reattach_allowed(&self, now: Instant, current_cycle: u64) -> bool {
        match self.reattach_last_attempt {
            None => true,
            Some(last) => {
                let elapsed_ok = now.duration_since(last).as_secs_f64() >= 60.0;
                let cycles_ok = current_cycle.saturating_sub(self.reattach_cycle_count) >= 3;
                elapsed_ok && cycles_ok
            }
        }
    }

    pub fn record_reattach_attempt(&mut self, now: Instant, current_cycle: u64) {
        self.reattach_last_attempt = Some(now);
        self.reattach_cycle_count = current_cycle;
    }
}

/// Process-wide `{breaker_name -> {active_until, trigger_reason}}` (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerState {
    pub tripped: HashMap<String, (Instant, String)>,
}

impl CircuitBreakerState {
    pub fn trip(&mut self, name: impl Into<String>, until: Instant, reason: impl Into<String>) {
        self.tripped.insert(name.into(), (until, reason.into()));
    }

    pub fn is_active(&self, name: &str, now: Instant) -> bool {
        self.tripped
            .get(name)
            .map(|(until, _)| now < *until)
            .unwrap_or(false)
    }

    pub fn active_reason(&self, name: &str, now: Instant) -> Option<&str> {
        self.tripped.get(name).and_then(|(until, reason)| {
            if now < *until {
                Some(reason.as_str())
            } else {
                None
            }
        })
    }
}

/// SHA-256 digest of `(symbol, side, rounded_tp, rounded_sl)`, used to
/// deduplicate protective-order attach attempts (spec §3 "TP/SL Hash").
pub fn tpsl_hash(symbol: &str, side: Signal, rounded_tp: Decimal, rounded_sl: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(format!("{side:?}").as_bytes());
    hasher.update(rounded_tp.to_string().as_bytes());
    hasher.update(rounded_sl.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Registry of active TP/SL hashes, one set shared process-wide so that a
/// reattach computing identical prices is suppressed (spec §8 invariant 3,
/// scenario S3).
#[derive(Debug, Clone, Default)]
pub struct TpslHashRegistry {
    active: HashSet<String>,
}

impl TpslHashRegistry {
    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.active.contains(hash)
    }

    pub fn register(&mut self, hash: String) {
        self.active.insert(hash);
    }

    pub fn unregister(&mut self, hash: &str) {
        self.active.remove(hash);
    }
}
