//! Row types for the five CSV logs named in spec §6. Kept as flat,
//! `Serialize`-only structs: one `CsvLog<T>` instance per file, written by
//! the orchestrator and its collaborators.

use rust_decimal::Decimal;
use serde::Serialize;

/// `equity_curve.csv`: `(ts, realized, unrealized, total, peak, drawdown)`.
#[derive(Debug, Clone, Serialize)]
pub struct EquityCurveRow {
    pub ts: i64,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub total: Decimal,
    pub peak: Decimal,
    pub drawdown: Decimal,
}

/// `trades_log.csv`: full trade record, one row per closed position.
#[derive(Debug, Clone, Serialize)]
pub struct TradeLogRow {
    pub ts: i64,
    pub symbol: String,
    pub side: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub exit_reason: String,
    pub realized_pnl: Decimal,
    pub hold_duration_secs: i64,
    pub decision_ref: String,
}

/// `decisions_log.csv`: one row per agent decision emitted in a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogRow {
    pub ts: i64,
    pub agent_id: String,
    pub symbol: String,
    pub raw_signal: String,
    pub raw_confidence: f64,
    pub normalized_confidence: f64,
    pub strategy_tag: String,
}

/// `errors_log.csv`: structured audit trail for mapped/transient/protocol
/// errors (spec §7). `kind` distinguishes the error category; `detail`
/// carries the `Display` text of the underlying error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogRow {
    pub ts: i64,
    pub symbol: Option<String>,
    pub kind: String,
    pub detail: String,
}

/// `learning_log.csv`: `(decision, outcome)` binding for the Confidence
/// Normalizer's rolling accuracy window (spec §4.O).
#[derive(Debug, Clone, Serialize)]
pub struct LearningLogRow {
    pub ts: i64,
    pub agent_id: String,
    pub symbol: String,
    pub decision_ref: String,
    pub raw_signal: String,
    pub normalized_confidence: f64,
    pub exit_reason: String,
    pub realized_pnl: Decimal,
    pub was_correct: bool,
}
