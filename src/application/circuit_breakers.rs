//! Entry-pausing circuit breakers (spec §4.H): three independent checks,
//! each pausing new entries for 10 minutes when tripped. Exits are never
//! paused — callers only consult this before `submit_entry`.
//!
//! Distinct from `infrastructure::core::circuit_breaker`'s generic
//! Closed/Open/HalfOpen breaker, which protects the gateway itself against
//! sustained transport failure.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::warn;

use crate::application::market_data::FeatureSet;
use crate::domain::ports::BookTicker;
use crate::domain::position::CircuitBreakerState;

const PAUSE_DURATION: Duration = Duration::from_secs(600);
const FUNDING_WINDOW: Duration = Duration::from_secs(3600);

const VOLATILITY_BREAKER: &str = "volatility_spike";
const FUNDING_BREAKER: &str = "funding_spike";
const QUOTE_SPREAD_BREAKER: &str = "quote_spread";

/// Tracks entry-pausing breaker state plus the funding-rate history each
/// symbol needs to detect a spike over a rolling hour.
#[derive(Debug, Default)]
pub struct EntryCircuitBreakers {
    state: CircuitBreakerState,
    funding_history: HashMap<String, VecDeque<(Instant, Decimal)>>,
}

impl EntryCircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs all three checks for `symbol` and records any trips. Call once
    /// per symbol per cycle, before consulting `entries_paused`.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        features: &FeatureSet,
        book_ticker: Option<&BookTicker>,
        funding_rate: Option<Decimal>,
        now: Instant,
    ) {
        self.check_volatility(symbol, features, now);
        if let Some(ticker) = book_ticker {
            self.check_quote_spread(symbol, ticker, now);
        }
        if let Some(rate) = funding_rate {
            self.check_funding(symbol, rate, now);
        }
    }

    fn trip(&mut self, breaker: &str, symbol: &str, now: Instant, reason: String) {
        let name = format!("{breaker}:{symbol}");
        warn!(breaker, symbol, reason = %reason, "entry circuit breaker tripped");
        self.state.trip(name, now + PAUSE_DURATION, reason);
    }

    fn check_volatility(&mut self, symbol: &str, features: &FeatureSet, now: Instant) {
        let (Some(spread), Some(median)) = (features.candle_spread, features.median_spread_20)
        else {
            return;
        };
        if median.is_zero() {
            return;
        }
        let threshold = median * Decimal::new(12, 1); // 1.2x
        if spread > threshold {
            self.trip(
                VOLATILITY_BREAKER,
                symbol,
                now,
                format!("candle spread {spread} > 1.2x median {median}"),
            );
        }
    }

    fn check_quote_spread(&mut self, symbol: &str, ticker: &BookTicker, now: Instant) {
        let spread_pct = ticker.spread_pct();
        if spread_pct > Decimal::new(15, 4) {
            // 0.0015 == 0.15%
            self.trip(
                QUOTE_SPREAD_BREAKER,
                symbol,
                now,
                format!("quote spread {spread_pct} > 0.15%"),
            );
        }
    }

    fn check_funding(&mut self, symbol: &str, rate: Decimal, now: Instant) {
        let history = self.funding_history.entry(symbol.to_string()).or_default();
        history.push_back((now, rate));
        while let Some((ts, _)) = history.front() {
            if now.duration_since(*ts) > FUNDING_WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }
        if let Some((_, oldest_rate)) = history.front() {
            let delta = (rate - oldest_rate).abs();
            // 0.1 percentage points == 0.001 as a fraction.
            if delta > Decimal::new(1, 3) {
                self.trip(
                    FUNDING_BREAKER,
                    symbol,
                    now,
                    format!("funding rate moved {delta} over the last hour"),
                );
            }
        }
    }

    /// True if any of the three breakers is currently active for `symbol`.
    pub fn entries_paused(&self, symbol: &str, now: Instant) -> bool {
        [VOLATILITY_BREAKER, FUNDING_BREAKER, QUOTE_SPREAD_BREAKER]
            .iter()
            .any(|b| self.state.is_active(&format!("{b}:{symbol}"), now))
    }

    pub fn active_reasons(&self, symbol: &str, now: Instant) -> Vec<String> {
        [VOLATILITY_BREAKER, FUNDING_BREAKER, QUOTE_SPREAD_BREAKER]
            .iter()
            .filter_map(|b| {
                self.state
                    .active_reason(&format!("{b}:{symbol}"), now)
                    .map(|r| r.to_string())
            })
            .collect()
    }
}

/// Exposed for metrics gauges that want a 0/1 reading per breaker name
/// without exposing the full state map.
pub fn breaker_names() -> [&'static str; 3] {
    [VOLATILITY_BREAKER, FUNDING_BREAKER, QUOTE_SPREAD_BREAKER]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn features_with_spread(spread: Decimal, median: Decimal) -> FeatureSet {
        FeatureSet {
            atr_fast: None,
            atr_slow: None,
            ema_20: None,
            rsi: None,
            macd_histogram: None,
            bollinger_upper: None,
            bollinger_lower: None,
            last_price: None,
            candle_spread: Some(spread),
            median_spread_20: Some(median),
        }
    }

    #[test]
    fn volatility_spike_pauses_entries_for_600s() {
        let mut breakers = EntryCircuitBreakers::new();
        let now = Instant::now();
        let features = features_with_spread(dec!(13.0), dec!(10.0)); // 1.3x > 1.2x
        breakers.evaluate("BTCUSDT", &features, None, None, now);
        assert!(breakers.entries_paused("BTCUSDT", now));
        assert!(!breakers.entries_paused("BTCUSDT", now + Duration::from_secs(601)));
    }

    #[test]
    fn below_threshold_spread_does_not_trip() {
        let mut breakers = EntryCircuitBreakers::new();
        let now = Instant::now();
        let features = features_with_spread(dec!(11.0), dec!(10.0)); // 1.1x
        breakers.evaluate("BTCUSDT", &features, None, None, now);
        assert!(!breakers.entries_paused("BTCUSDT", now));
    }

    #[test]
    fn quote_spread_above_15_bps_trips() {
        let mut breakers = EntryCircuitBreakers::new();
        let now = Instant::now();
        let ticker = BookTicker {
            bid_price: dec!(100.0),
            ask_price: dec!(100.2), // ~0.2% spread
        };
        let features = features_with_spread(dec!(1.0), dec!(1.0));
        breakers.evaluate("ETHUSDT", &features, Some(&ticker), None, now);
        assert!(breakers.entries_paused("ETHUSDT", now));
    }

    #[test]
    fn funding_rate_spike_over_hour_trips() {
        let mut breakers = EntryCircuitBreakers::new();
        let t0 = Instant::now();
        let features = features_with_spread(dec!(1.0), dec!(1.0));
        breakers.evaluate("SOLUSDT", &features, None, Some(dec!(0.0001)), t0);
        // 30 minutes later the rate has moved by 0.15pp.
        let t1 = t0 + Duration::from_secs(1800);
        breakers.evaluate("SOLUSDT", &features, None, Some(dec!(0.0016)), t1);
        assert!(breakers.entries_paused("SOLUSDT", t1));
    }

    #[test]
    fn funding_history_outside_window_is_pruned() {
        let mut breakers = EntryCircuitBreakers::new();
        let t0 = Instant::now();
        let features = features_with_spread(dec!(1.0), dec!(1.0));
        breakers.evaluate("SOLUSDT", &features, None, Some(dec!(0.0001)), t0);
        // Over an hour later: the old sample should be pruned, so a big jump
        // from the *new* baseline is what matters, not the stale one.
        let t1 = t0 + Duration::from_secs(3700);
        breakers.evaluate("SOLUSDT", &features, None, Some(dec!(0.0002)), t1);
        assert!(!breakers.entries_paused("SOLUSDT", t1));
    }

    #[test]
    fn independent_breakers_trip_independently_per_symbol() {
        let mut breakers = EntryCircuitBreakers::new();
        let now = Instant::now();
        let spiky = features_with_spread(dec!(13.0), dec!(10.0));
        let calm = features_with_spread(dec!(1.0), dec!(1.0));
        breakers.evaluate("BTCUSDT", &spiky, None, None, now);
        breakers.evaluate("ETHUSDT", &calm, None, None, now);
        assert!(breakers.entries_paused("BTCUSDT", now));
        assert!(!breakers.entries_paused("ETHUSDT", now));
    }
}
