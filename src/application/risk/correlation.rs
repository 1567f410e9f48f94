//! Correlation adjustment (spec §4.G): halves position size when a symbol's
//! 50-bar return correlation with another already-open, same-direction
//! symbol exceeds 0.8 in absolute value.

use statrs::statistics::{Data, Distribution};

use crate::domain::decision::Signal;

const LOOKBACK: usize = 50;
const CORRELATION_THRESHOLD: f64 = 0.8;

/// Computes simple period-over-period returns from a close-price series.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

/// Pearson correlation of the last `LOOKBACK` aligned returns. `None` if
/// either series is shorter than the lookback or has zero variance.
pub fn pearson_correlation(returns_a: &[f64], returns_b: &[f64]) -> Option<f64> {
    let n = returns_a.len().min(returns_b.len());
    if n < LOOKBACK {
        return None;
    }
    let a: Vec<f64> = returns_a[returns_a.len() - LOOKBACK..].to_vec();
    let b: Vec<f64> = returns_b[returns_b.len() - LOOKBACK..].to_vec();

    let data_a = Data::new(a.clone());
    let data_b = Data::new(b.clone());
    let mean_a = data_a.mean()?;
    let mean_b = data_b.mean()?;
    let std_a = data_a.std_dev()?;
    let std_b = data_b.std_dev()?;
    if std_a == 0.0 || std_b == 0.0 {
        return None;
    }

    let covariance: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / (LOOKBACK as f64 - 1.0);

    Some(covariance / (std_a * std_b))
}

/// Input describing another symbol already carrying an open position, used
/// to decide whether `symbol`'s new entry should be downsized.
pub struct OpenExposure<'a> {
    pub symbol: &'a str,
    pub side: Signal,
    pub returns: &'a [f64],
}

/// `0.5` if any `other` exposure is same-direction and `|corr| > 0.8`,
/// otherwise `1.0`.
pub fn correlation_adjustment(side: Signal, own_returns: &[f64], others: &[OpenExposure]) -> f64 {
    for other in others {
        if other.side != side {
            continue;
        }
        if let Some(corr) = pearson_correlation(own_returns, other.returns)
            && corr.abs() > CORRELATION_THRESHOLD
        {
            return 0.5;
        }
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_correlated_series(n: usize) -> (Vec<f64>, Vec<f64>) {
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        let mut price_a = 100.0;
        let mut price_b = 50.0;
        for i in 0..n {
            let step = if i % 2 == 0 { 0.5 } else { -0.3 };
            price_a += step;
            price_b += step * 0.9; // near-identical moves, scaled
            a.push(price_a);
            b.push(price_b);
        }
        (a, b)
    }

    #[test]
    fn highly_correlated_series_scores_above_threshold() {
        let (prices_a, prices_b) = synthetic_correlated_series(60);
        let ra = returns(&prices_a);
        let rb = returns(&prices_b);
        let corr = pearson_correlation(&ra, &rb).expect("enough data");
        assert!(corr.abs() > CORRELATION_THRESHOLD, "corr={corr}");
    }

    #[test]
    fn short_series_returns_none() {
        let ra = returns(&[1.0, 2.0, 3.0]);
        let rb = returns(&[1.0, 2.0, 3.0]);
        assert_eq!(pearson_correlation(&ra, &rb), None);
    }

    #[test]
    fn same_direction_high_correlation_halves_size() {
        let (prices_a, prices_b) = synthetic_correlated_series(60);
        let own_returns = returns(&prices_a);
        let other_returns = returns(&prices_b);
        let others = vec![OpenExposure {
            symbol: "ETHUSDT",
            side: Signal::Long,
            returns: &other_returns,
        }];
        assert_eq!(correlation_adjustment(Signal::Long, &own_returns, &others), 0.5);
    }

    #[test]
    fn opposite_direction_exposure_is_ignored() {
        let (prices_a, prices_b) = synthetic_correlated_series(60);
        let own_returns = returns(&prices_a);
        let other_returns = returns(&prices_b);
        let others = vec![OpenExposure {
            symbol: "ETHUSDT",
            side: Signal::Short,
            returns: &other_returns,
        }];
        assert_eq!(correlation_adjustment(Signal::Long, &own_returns, &others), 1.0);
    }

    #[test]
    fn no_open_exposures_leaves_size_unadjusted() {
        let (prices_a, _) = synthetic_correlated_series(60);
        let own_returns = returns(&prices_a);
        assert_eq!(correlation_adjustment(Signal::Long, &own_returns, &[]), 1.0);
    }
}
