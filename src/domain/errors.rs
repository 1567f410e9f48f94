//! Error surfaces for the trading control plane (spec §6 mapped-error table,
//! §7 error handling design). Kept as `thiserror`-derived enums with
//! structured fields so the Sentinel and Live Monitor can branch on *which*
//! error occurred, not just its message.

use rust_decimal::Decimal;
use thiserror::Error;

/// Single source of truth for venue error-code policy (spec §6). Every other
/// component matches on these variants rather than raw integers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("margin insufficient (-2019)")]
    MarginInsufficient,

    #[error("would immediately trigger / timing (-2021)")]
    ImmediateTriggerTiming,

    #[error("reduceOnly sent when not required (-1106)")]
    ReduceOnlyNotRequired,

    #[error("unknown order (-2011)")]
    UnknownOrder,

    #[error("duplicate reduce-only order (-4164)")]
    DuplicateReduceOnly,

    #[error("max open orders reached (-2010)")]
    MaxOpenOrders,

    #[error("rate limited (429), retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("transient transport error: {reason}")]
    Transient { reason: String },

    #[error("symbol filter stale/invalid for {symbol}")]
    InvalidSymbolFilter { symbol: String },

    #[error("unmapped exchange error code {code}: {message}")]
    Unmapped { code: i64, message: String },
}

impl GatewayError {
    /// Maps a raw `(code, message)` pair from the venue into the mapped
    /// enum; anything not in the table falls through to `Unmapped`.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        match code {
            -2019 => GatewayError::MarginInsufficient,
            -2021 => GatewayError::ImmediateTriggerTiming,
            -1106 => GatewayError::ReduceOnlyNotRequired,
            -2011 => GatewayError::UnknownOrder,
            -4164 => GatewayError::DuplicateReduceOnly,
            -2010 => GatewayError::MaxOpenOrders,
            429 => GatewayError::RateLimited { retry_after_secs: 1 },
            other => GatewayError::Unmapped {
                code: other,
                message: message.into(),
            },
        }
    }

    /// -2011 and -4164 are treated as success by callers that attach/cancel
    /// protective orders (spec §4.L step 4, §6).
    pub fn treat_as_success(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownOrder | GatewayError::DuplicateReduceOnly
        )
    }

    pub fn should_retry_once(&self) -> bool {
        matches!(self, GatewayError::ImmediateTriggerTiming)
    }

    pub fn requires_fallback_mode(&self) -> bool {
        matches!(self, GatewayError::ReduceOnlyNotRequired)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderManagerError {
    #[error("entry rejected: same-direction cooldown active ({remaining_secs}s remaining)")]
    SameDirectionCooldown { remaining_secs: i64 },

    #[error("entry rejected: reversal cooldown active ({remaining_secs}s remaining)")]
    ReversalCooldown { remaining_secs: i64 },

    #[error("entry rejected: open position in same direction already exists")]
    DuplicatePosition,

    #[error("entry confirmation timed out")]
    EntryUnconfirmed,

    #[error("computed TP/SL geometry invalid for {symbol} side {side:?}: tp={tp} sl={sl} entry={entry}")]
    InvalidTpslGeometry {
        symbol: String,
        side: crate::domain::decision::Signal,
        tp: Decimal,
        sl: Decimal,
        entry: Decimal,
    },

    #[error("TP/SL attach incomplete after retry for {symbol}")]
    TpslIncomplete { symbol: String },

    #[error("exit rejected: below minimum notional/quantity")]
    BelowMinimum,

    #[error("exit rejected: debounce window active")]
    ExitDebounced,

    #[error("exit rejected: position not in an exitable state")]
    NotExitable,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("all graceful close paths failed, manual operator action required")]
    ExitFailureManual,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskViolation {
    #[error("kill-switch active: {reason}")]
    KillSwitchActive { reason: String },

    #[error("circuit breaker active: {breaker}")]
    CircuitBreakerActive { breaker: String },

    #[error("regime {regime} forbids new entries")]
    RegimeSkipsEntry { regime: String },

    #[error("sizing produced non-positive quantity")]
    ZeroSize,

    #[error("notional {notional} below minimum margin {min_margin}")]
    BelowMinMargin {
        notional: Decimal,
        min_margin: Decimal,
    },

    #[error("notional {notional} exceeds maximum margin {max_margin}")]
    AboveMaxMargin {
        notional: Decimal,
        max_margin: Decimal,
    },

    #[error("max positions per symbol exceeded ({max})")]
    MaxPositionsExceeded { max: u32 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecisionError {
    #[error("decision provider unavailable (upstream timeout)")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(
            GatewayError::from_code(-2019, "x"),
            GatewayError::MarginInsufficient
        );
        assert_eq!(
            GatewayError::from_code(-4164, "x"),
            GatewayError::DuplicateReduceOnly
        );
    }

    #[test]
    fn unmapped_code_carries_original_message() {
        match GatewayError::from_code(-9999, "weird") {
            GatewayError::Unmapped { code, message } => {
                assert_eq!(code, -9999);
                assert_eq!(message, "weird");
            }
            other => panic!("expected Unmapped, got {other:?}"),
        }
    }

    #[test]
    fn treat_as_success_covers_spec_table() {
        assert!(GatewayError::UnknownOrder.treat_as_success());
        assert!(GatewayError::DuplicateReduceOnly.treat_as_success());
        assert!(!GatewayError::MarginInsufficient.treat_as_success());
    }

    #[test]
    fn reduce_only_requires_fallback_mode() {
        assert!(GatewayError::ReduceOnlyNotRequired.requires_fallback_mode());
    }
}
