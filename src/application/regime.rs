//! Dual-ATR volatility regime classifier (spec §4.C).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::market_data::FeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Extreme,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeOutput {
    pub regime: Regime,
    pub vr: Decimal,
    pub confidence_delta: f64,
    pub size_multiplier: Decimal,
    pub tp_atr_multiplier: Decimal,
    pub sl_atr_multiplier: Decimal,
}

impl RegimeOutput {
    pub fn skips_entry(&self) -> bool {
        matches!(self.regime, Regime::Extreme | Regime::Low)
    }
}

/// `VR = ATR_fast / ATR_slow`, `ATR_pct = ATR / price`. Bands per spec §4.C:
/// EXTREME if VR>=1.8, HIGH if 1.2<=VR<1.8, LOW if VR<0.5 and ATR_pct<0.2%,
/// NORMAL otherwise.
pub fn classify(features: &FeatureSet) -> Option<RegimeOutput> {
    let atr_fast = features.atr_fast?;
    let atr_slow = features.atr_slow?;
    let price = features.last_price?;
    if atr_slow.is_zero() || price.is_zero() {
        return None;
    }

    let vr = atr_fast / atr_slow;
    let atr_pct = atr_fast / price;

    let regime = if vr >= dec!(1.8) {
        Regime::Extreme
    } else if vr >= dec!(1.2) {
        Regime::High
    } else if vr < dec!(0.5) && atr_pct < dec!(0.002) {
        Regime::Low
    } else {
        Regime::Normal
    };

    let output = match regime {
        Regime::Extreme => RegimeOutput {
            regime,
            vr,
            confidence_delta: 0.0,
            size_multiplier: Decimal::ZERO,
            tp_atr_multiplier: dec!(2.5),
            sl_atr_multiplier: dec!(1.25),
        },
        Regime::High => RegimeOutput {
            regime,
            vr,
            confidence_delta: -0.03,
            size_multiplier: dec!(0.75),
            tp_atr_multiplier: dec!(2.5),
            sl_atr_multiplier: dec!(1.25),
        },
        Regime::Normal => RegimeOutput {
            regime,
            vr,
            confidence_delta: 0.0,
            size_multiplier: dec!(1.0),
            tp_atr_multiplier: dec!(2.2),
            sl_atr_multiplier: dec!(1.1),
        },
        Regime::Low => RegimeOutput {
            regime,
            vr,
            confidence_delta: 0.0,
            size_multiplier: Decimal::ZERO,
            tp_atr_multiplier: dec!(2.2),
            sl_atr_multiplier: dec!(1.1),
        },
    };

    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(atr_fast: Decimal, atr_slow: Decimal, price: Decimal) -> FeatureSet {
        FeatureSet {
            atr_fast: Some(atr_fast),
            atr_slow: Some(atr_slow),
            last_price: Some(price),
            ..Default::default()
        }
    }

    #[test]
    fn extreme_regime_skips_entry() {
        let f = features(dec!(18), dec!(10), dec!(60000));
        let out = classify(&f).unwrap();
        assert_eq!(out.regime, Regime::Extreme);
        assert!(out.skips_entry());
        assert_eq!(out.size_multiplier, Decimal::ZERO);
    }

    #[test]
    fn high_regime_reduces_size_and_confidence() {
        let f = features(dec!(13), dec!(10), dec!(60000));
        let out = classify(&f).unwrap();
        assert_eq!(out.regime, Regime::High);
        assert_eq!(out.size_multiplier, dec!(0.75));
        assert_eq!(out.confidence_delta, -0.03);
    }

    #[test]
    fn low_regime_requires_both_conditions() {
        // VR < 0.5 but ATR_pct too high -> NORMAL, not LOW.
        let f = features(dec!(4), dec!(10), dec!(100));
        let out = classify(&f).unwrap();
        assert_eq!(out.regime, Regime::Normal);
    }

    #[test]
    fn low_regime_when_both_conditions_met() {
        let f = features(dec!(4), dec!(10), dec!(60000));
        let out = classify(&f).unwrap();
        assert_eq!(out.regime, Regime::Low);
        assert!(out.skips_entry());
    }

    #[test]
    fn normal_regime_defaults() {
        let f = features(dec!(11), dec!(10), dec!(60000));
        let out = classify(&f).unwrap();
        assert_eq!(out.regime, Regime::Normal);
        assert_eq!(out.size_multiplier, dec!(1.0));
    }

    #[test]
    fn missing_atr_returns_none() {
        let f = FeatureSet::default();
        assert!(classify(&f).is_none());
    }
}
