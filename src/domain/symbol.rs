//! Symbol identity and exchange filter metadata (spec §3 "Symbol").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol rounding/notional constraints, fetched once from the venue and
/// refreshable only on an explicit filter-mismatch error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Rounds a price down to the nearest `tick_size`. See
    /// `enforce_min_tick_offset` for the separate minimum-distance-from-mark
    /// safety nudge.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_step(price, self.tick_size)
    }

    pub fn round_qty(&self, qty: Decimal) -> Decimal {
        round_to_step(qty, self.step_size)
    }

    /// Minimum safety offset of 2 ticks from `mark_price`, applied in the
    /// direction away from mark (per spec §4.A).
    pub fn enforce_min_tick_offset(&self, price: Decimal, mark_price: Decimal) -> Decimal {
        let min_offset = self.tick_size * Decimal::from(2);
        if price >= mark_price {
            price.max(mark_price + min_offset)
        } else {
            price.min(mark_price - min_offset)
        }
    }

    pub fn meets_min_notional(&self, qty: Decimal, price: Decimal) -> bool {
        qty * price >= self.min_notional
    }
}

fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).trunc() * step
}

/// Normalizes an exchange-native symbol string to its canonical uppercase
/// form (e.g. `"btcusdt"` -> `"BTCUSDT"`).
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "BTCUSDT".to_string(),
            tick_size: dec!(0.1),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        }
    }

    #[test]
    fn rounds_price_down_to_tick() {
        let f = filters();
        assert_eq!(f.round_price(dec!(60000.37)), dec!(60000.3));
    }

    #[test]
    fn rounds_qty_down_to_step() {
        let f = filters();
        assert_eq!(f.round_qty(dec!(1.2345)), dec!(1.234));
    }

    #[test]
    fn enforces_minimum_tick_offset_above_mark() {
        let f = filters();
        let nudged = f.enforce_min_tick_offset(dec!(60000.05), dec!(60000.0));
        assert_eq!(nudged, dec!(60000.2));
    }

    #[test]
    fn enforces_minimum_tick_offset_below_mark() {
        let f = filters();
        let nudged = f.enforce_min_tick_offset(dec!(59999.95), dec!(60000.0));
        assert_eq!(nudged, dec!(59999.8));
    }

    #[test]
    fn rejects_below_min_notional() {
        let f = filters();
        assert!(!f.meets_min_notional(dec!(0.0001), dec!(60000)));
    }

    #[test]
    fn normalizes_symbol_case() {
        assert_eq!(normalize_symbol(" btcusdt "), "BTCUSDT");
    }
}
