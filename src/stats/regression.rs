use nalgebra::{DMatrix, DVector};

use super::StatsError;

const PIVOT_EPS: f64 = 1e-12;

/// Result of a least-squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coef: Vec<f64>,
    pub std_err: Vec<f64>,
    pub rss: f64,
    pub nobs: usize,
}

impl OlsFit {
    pub fn t_stat(&self, idx: usize) -> f64 {
        let se = self.std_err[idx];
        if se < PIVOT_EPS {
            0.0
        } else {
            self.coef[idx] / se
        }
    }

    /// Gaussian AIC up to an additive constant shared by fits on the same sample.
    pub fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        n * (self.rss / n).max(f64::MIN_POSITIVE).ln() + 2.0 * self.coef.len() as f64
    }
}

/// Multiple regression of `y` on the columns of `x` (no implicit intercept).
pub fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, StatsError> {
    let (nobs, k) = x.shape();
    if nobs != y.len() {
        return Err(StatsError::DegenerateInput(format!(
            "regressor rows ({}) and observations ({}) differ",
            nobs,
            y.len()
        )));
    }
    if k == 0 {
        return Err(StatsError::DegenerateInput("no regressors".to_string()));
    }
    if nobs <= k {
        return Err(StatsError::InsufficientData {
            needed: k + 1,
            available: nobs,
        });
    }

    let xt = x.transpose();
    let xtx = &xt * x;
    let xty = &xt * y;

    let singular = xtx.singular_values();
    let largest = singular.max();
    if !(largest > 0.0) || singular.min() < PIVOT_EPS * largest {
        return Err(StatsError::SingularMatrix(format!(
            "{}x{} normal matrix is rank deficient",
            k, k
        )));
    }
    let inv = xtx.try_inverse().ok_or_else(|| {
        StatsError::SingularMatrix(format!("{}x{} normal matrix has no inverse", k, k))
    })?;

    let coef = &inv * xty;
    let residuals = y - x * &coef;
    let rss = residuals.norm_squared();
    if !rss.is_finite() || coef.iter().any(|c| !c.is_finite()) {
        return Err(StatsError::NonFinite("regression produced non-finite values".to_string()));
    }
    let sigma2 = rss / (nobs - k) as f64;
    let std_err = inv
        .diagonal()
        .iter()
        .map(|d| (sigma2 * d).max(0.0).sqrt())
        .collect();

    Ok(OlsFit {
        coef: coef.iter().copied().collect(),
        std_err,
        rss,
        nobs,
    })
}

/// Regress `y` on `x` with an intercept. Returns `(intercept, slope)`.
pub fn simple_ols(y: &[f64], x: &[f64]) -> Result<(f64, f64), StatsError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(StatsError::InsufficientData {
            needed: 2,
            available: n,
        });
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        cov += dx * (y[i] - mean_y);
        var_x += dx * dx;
    }
    if var_x.abs() < PIVOT_EPS {
        return Err(StatsError::SingularMatrix(
            "independent series has zero variance".to_string(),
        ));
    }
    let slope = cov / var_x;
    Ok((mean_y - slope * mean_x, slope))
}
