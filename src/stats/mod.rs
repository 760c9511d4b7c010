pub mod cointegration;
pub mod kalman;
pub mod regression;

use std::collections::VecDeque;
use thiserror::Error;

pub use cointegration::{adf, engle_granger, mackinnon_p_value, AdfRegression, AdfResult, CointResult};
pub use kalman::KalmanState;
pub use regression::{ols, simple_ols, OlsFit};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("insufficient data: need {needed} points, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("singular design matrix: {0}")]
    SingularMatrix(String),

    #[error("non-finite value: {0}")]
    NonFinite(String),
}

/// Population mean and standard deviation (divides by `n`).
pub fn mean_std<'a, I>(values: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let mut count = 0usize;
    let mut sum = 0.0;
    for v in iter.clone() {
        sum += *v;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    let var = iter
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    Some((mean, var.sqrt()))
}

/// Standard deviation of the last `len` entries of `window`.
pub fn tail_std(window: &VecDeque<f64>, len: usize) -> Option<f64> {
    if window.is_empty() || len == 0 {
        return None;
    }
    let start = window.len().saturating_sub(len);
    mean_std(window.range(start..)).map(|(_, std)| std)
}

/// AR(1) half-life of a spread series.
///
/// Fits `Δs_t = α + β·s_{t-1}` by least squares and returns `-ln 2 / β` when the
/// slope indicates mean reversion. A non-negative slope (or a lag regressor with
/// no variance) is reported as `fallback`.
pub fn half_life(spreads: &[f64], fallback: f64) -> Option<f64> {
    if spreads.len() < 3 {
        return None;
    }
    let n = spreads.len() - 1;
    let mut lag_sum = 0.0;
    let mut delta_sum = 0.0;
    for win in spreads.windows(2) {
        lag_sum += win[0];
        delta_sum += win[1] - win[0];
    }
    let mean_lag = lag_sum / n as f64;
    let mean_delta = delta_sum / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for win in spreads.windows(2) {
        let dx = win[0] - mean_lag;
        let dy = (win[1] - win[0]) - mean_delta;
        num += dx * dy;
        den += dx * dx;
    }
    if den.abs() < 1e-12 {
        return Some(fallback);
    }
    let beta = num / den;
    if beta < 0.0 {
        Some(-(2.0_f64).ln() / beta)
    } else {
        Some(fallback)
    }
}

/// Standard normal CDF.
pub(crate) fn norm_cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_std_uses_population_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (mean, std) = mean_std(values.iter()).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn mean_std_empty_is_none() {
        let values: [f64; 0] = [];
        assert!(mean_std(values.iter()).is_none());
    }

    #[test]
    fn tail_std_only_looks_at_recent_values() {
        let window: VecDeque<f64> = vec![100.0, -100.0, 1.0, 1.0, 1.0].into();
        assert_eq!(tail_std(&window, 3), Some(0.0));
        assert!(tail_std(&window, 5).unwrap() > 10.0);
    }

    #[test]
    fn half_life_matches_known_ar1_decay() {
        // s_t - s_{t-1} = 0.5 - 0.1 * s_{t-1}, no noise, so OLS recovers beta exactly.
        let beta = -0.1;
        let alpha = 0.5;
        let mut spreads = vec![20.0];
        for _ in 0..59 {
            let prev = *spreads.last().unwrap();
            spreads.push(prev + alpha + beta * prev);
        }
        let hl = half_life(&spreads, 100.0).unwrap();
        let expected = -(2.0_f64).ln() / beta;
        assert!((hl - expected).abs() < 1e-6, "hl={} expected={}", hl, expected);
    }

    #[test]
    fn half_life_falls_back_for_pure_drift() {
        let spreads: Vec<f64> = (0..60).map(|i| i as f64).collect();
        assert_eq!(half_life(&spreads, 100.0), Some(100.0));
    }

    #[test]
    fn half_life_falls_back_for_explosive_series() {
        let mut spreads = vec![1.0];
        for _ in 0..40 {
            let prev = *spreads.last().unwrap();
            spreads.push(prev * 1.05);
        }
        assert_eq!(half_life(&spreads, 100.0), Some(100.0));
    }

    #[test]
    fn half_life_fallback_is_configurable() {
        let spreads: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert_eq!(half_life(&spreads, 250.0), Some(250.0));
    }

    #[test]
    fn norm_cdf_reference_points() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((norm_cdf(1.959964) - 0.975).abs() < 1e-6);
        assert!((norm_cdf(-1.644854) - 0.05).abs() < 1e-6);
    }
}
