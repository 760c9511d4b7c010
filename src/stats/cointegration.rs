//! Unit-root and cointegration tests.
//!
//! `adf` is an augmented Dickey-Fuller regression with AIC lag selection and
//! `engle_granger` runs the two-step test on a pair of price windows. P-values
//! use MacKinnon's response-surface approximation for the constant-only case.

use nalgebra::{DMatrix, DVector};

use super::regression::{ols, simple_ols};
use super::{norm_cdf, StatsError};

const MIN_ADF_OBS: usize = 8;
const MIN_COINT_OBS: usize = 12;

// MacKinnon (1994, 2010) tables, regression with constant, indexed by the
// number of variables in the cointegrating relation (1 = plain ADF).
const TAU_MAX_C: [f64; 2] = [2.74, 0.92];
const TAU_MIN_C: [f64; 2] = [-18.83, -18.86];
const TAU_STAR_C: [f64; 2] = [-1.61, -2.62];
const TAU_SMALLP_C: [[f64; 3]; 2] = [[2.1659, 1.4412, 0.038269], [2.92, 1.5012, 0.039796]];
const TAU_LARGEP_C: [[f64; 4]; 2] = [
    [1.7339, 0.93202, -0.12745, -0.010368],
    [2.1945, 0.64695, -0.29198, -0.042377],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdfRegression {
    NoConstant,
    Constant,
}

#[derive(Debug, Clone)]
pub struct AdfResult {
    pub statistic: f64,
    pub lags: usize,
    pub nobs: usize,
}

#[derive(Debug, Clone)]
pub struct CointResult {
    pub intercept: f64,
    pub hedge_ratio: f64,
    pub adf_statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    pub nobs: usize,
}

/// Approximate p-value of a Dickey-Fuller type statistic.
///
/// `n_vars` is 1 for a plain ADF test and 2 for an Engle-Granger test on a pair.
pub fn mackinnon_p_value(statistic: f64, n_vars: usize) -> f64 {
    let idx = n_vars.clamp(1, TAU_MAX_C.len()) - 1;
    if statistic.is_nan() {
        return 1.0;
    }
    if statistic > TAU_MAX_C[idx] {
        return 1.0;
    }
    if statistic < TAU_MIN_C[idx] {
        return 0.0;
    }
    let poly = if statistic <= TAU_STAR_C[idx] {
        polyval(&TAU_SMALLP_C[idx], statistic)
    } else {
        polyval(&TAU_LARGEP_C[idx], statistic)
    };
    norm_cdf(poly).clamp(0.0, 1.0)
}

fn polyval(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Lag cap from Schwert's rule, bounded by what the sample can support.
fn default_max_lag(n: usize) -> usize {
    (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize
}

fn adf_design(
    series: &[f64],
    diffs: &[f64],
    lags: usize,
    start: usize,
    regression: AdfRegression,
) -> (DMatrix<f64>, DVector<f64>) {
    let nrows = diffs.len().saturating_sub(start);
    let ncols = lags + 1 + usize::from(regression == AdfRegression::Constant);
    // columns: lagged level, lagged differences, then the constant
    let design = DMatrix::from_fn(nrows, ncols, |r, c| {
        let t = start + r;
        match c {
            0 => series[t],
            c if c <= lags => diffs[t - c],
            _ => 1.0,
        }
    });
    let target = DVector::from_fn(nrows, |r, _| diffs[start + r]);
    (design, target)
}

/// Augmented Dickey-Fuller test statistic for `series`.
///
/// Lags are chosen by AIC over a common sample; the chosen model is
/// then refit on every observation it can use.
pub fn adf(
    series: &[f64],
    regression: AdfRegression,
    max_lag: Option<usize>,
) -> Result<AdfResult, StatsError> {
    let n = series.len();
    if n < MIN_ADF_OBS {
        return Err(StatsError::InsufficientData {
            needed: MIN_ADF_OBS,
            available: n,
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite("adf input".to_string()));
    }
    let trend_terms = usize::from(regression == AdfRegression::Constant);
    let sample_cap = (n / 2).saturating_sub(trend_terms + 1);
    let max_lag = max_lag.unwrap_or_else(|| default_max_lag(n)).min(sample_cap);

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let mut best: Option<(usize, f64)> = None;
    let mut last_err = None;
    for lags in 0..=max_lag {
        let (rows, y) = adf_design(series, &diffs, lags, max_lag, regression);
        match ols(&rows, &y) {
            Ok(fit) => {
                let aic = fit.aic();
                if best.map(|(_, b)| aic < b).unwrap_or(true) {
                    best = Some((lags, aic));
                }
            }
            Err(err) => last_err = Some(err),
        }
    }
    let lags = match best {
        Some((lags, _)) => lags,
        None => {
            return Err(last_err
                .unwrap_or_else(|| StatsError::DegenerateInput("no admissible lag".to_string())))
        }
    };

    let (rows, y) = adf_design(series, &diffs, lags, lags, regression);
    let fit = ols(&rows, &y)?;
    Ok(AdfResult {
        statistic: fit.t_stat(0),
        lags,
        nobs: fit.nobs,
    })
}

/// Two-step Engle-Granger cointegration test of `y` against `x`.
pub fn engle_granger(
    y: &[f64],
    x: &[f64],
    max_lag: Option<usize>,
) -> Result<CointResult, StatsError> {
    if y.len() != x.len() {
        return Err(StatsError::DegenerateInput(format!(
            "series lengths differ ({} vs {})",
            y.len(),
            x.len()
        )));
    }
    let n = y.len();
    if n < MIN_COINT_OBS {
        return Err(StatsError::InsufficientData {
            needed: MIN_COINT_OBS,
            available: n,
        });
    }
    if y.iter().chain(x.iter()).any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite("cointegration input".to_string()));
    }

    let (intercept, hedge_ratio) = simple_ols(y, x)?;
    let residuals: Vec<f64> = y
        .iter()
        .zip(x.iter())
        .map(|(yi, xi)| yi - intercept - hedge_ratio * xi)
        .collect();

    let mean_y = y.iter().sum::<f64>() / n as f64;
    let tss: f64 = y.iter().map(|v| (v - mean_y) * (v - mean_y)).sum();
    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 1.0 };
    if r_squared >= 1.0 - 100.0 * f64::EPSILON.sqrt() {
        log::debug!(
            "[STATS] pair is (almost) perfectly collinear (r2={:.12}); treating as cointegrated",
            r_squared
        );
        return Ok(CointResult {
            intercept,
            hedge_ratio,
            adf_statistic: f64::NEG_INFINITY,
            p_value: 0.0,
            lags: 0,
            nobs: n,
        });
    }

    let res = adf(&residuals, AdfRegression::NoConstant, max_lag)?;
    Ok(CointResult {
        intercept,
        hedge_ratio,
        adf_statistic: res.statistic,
        p_value: mackinnon_p_value(res.statistic, 2),
        lags: res.lags,
        nobs: res.nobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn ar1(phi: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut out = Vec::with_capacity(n);
        let mut prev = 0.0;
        for _ in 0..n {
            prev = phi * prev + noise.sample(&mut rng);
            out.push(prev);
        }
        out
    }

    #[test]
    fn mackinnon_two_variable_five_percent_point() {
        let p = mackinnon_p_value(-3.34, 2);
        assert!((p - 0.05).abs() < 0.005, "p={}", p);
    }

    #[test]
    fn mackinnon_bounds() {
        assert_eq!(mackinnon_p_value(-25.0, 2), 0.0);
        assert_eq!(mackinnon_p_value(1.5, 2), 1.0);
        assert_eq!(mackinnon_p_value(f64::NEG_INFINITY, 2), 0.0);
        assert_eq!(mackinnon_p_value(f64::NAN, 2), 1.0);
    }

    #[test]
    fn mackinnon_is_monotonic() {
        let mut prev = 0.0;
        let mut t = -18.0;
        while t < 0.9 {
            let p = mackinnon_p_value(t, 2);
            assert!(p + 1e-3 >= prev, "p dropped at t={} ({} < {})", t, p, prev);
            prev = p;
            t += 0.05;
        }
    }

    #[test]
    fn adf_rejects_unit_root_for_fast_mean_reversion() {
        let series = ar1(0.3, 300, 7);
        let res = adf(&series, AdfRegression::Constant, None).unwrap();
        assert!(res.statistic < -5.0, "stat={}", res.statistic);
        assert!(mackinnon_p_value(res.statistic, 1) < 0.01);
    }

    #[test]
    fn adf_respects_explicit_lag_cap() {
        let series = ar1(0.5, 120, 11);
        let res = adf(&series, AdfRegression::NoConstant, Some(0)).unwrap();
        assert_eq!(res.lags, 0);
        assert_eq!(res.nobs, 119);
    }

    #[test]
    fn adf_requires_minimum_sample() {
        let err = adf(&[1.0, 2.0, 3.0], AdfRegression::Constant, None).unwrap_err();
        assert!(matches!(err, StatsError::InsufficientData { .. }));
    }

    #[test]
    fn engle_granger_detects_cointegrated_pair() {
        let mut rng = StdRng::seed_from_u64(42);
        let step = Normal::new(0.0, 1.0).unwrap();
        let noise = ar1(0.2, 250, 43);
        let mut level = 100.0;
        let mut x = Vec::new();
        let mut y = Vec::new();
        for e in noise {
            level += step.sample(&mut rng);
            x.push(level);
            y.push(5.0 + 1.5 * level + e);
        }
        let res = engle_granger(&y, &x, None).unwrap();
        assert!((res.hedge_ratio - 1.5).abs() < 0.1, "beta={}", res.hedge_ratio);
        assert!(res.p_value < 0.01, "p={}", res.p_value);
    }

    #[test]
    fn engle_granger_collinear_pair_is_cointegrated() {
        let x: Vec<f64> = (0..60).map(|i| 50.0 + (i as f64 * 0.2).sin() * 3.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let res = engle_granger(&y, &x, None).unwrap();
        assert_eq!(res.p_value, 0.0);
        assert!((res.hedge_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn engle_granger_rejects_mismatched_lengths() {
        let err = engle_granger(&[1.0; 20], &[1.0; 19], None).unwrap_err();
        assert!(matches!(err, StatsError::DegenerateInput(_)));
    }

    #[test]
    fn engle_granger_constant_leg_is_singular() {
        let y: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let x = vec![10.0; 30];
        assert!(matches!(
            engle_granger(&y, &x, None),
            Err(StatsError::SingularMatrix(_))
        ));
    }
}
