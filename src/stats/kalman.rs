//! Scalar Kalman filter for an adaptive hedge ratio.
//!
//! The state is a plain `Copy` value: every bar produces a new state from the
//! previous one, so a run is reproducible from `(q, r, x0, p0)` and the price
//! sequence alone. Bars must be fed in chronological order.
//!
//! ```text
//! predict:  x⁻ = x        P⁻ = P + Q
//! gain:     K  = P⁻ / (P⁻ + R)
//! correct:  x  = x⁻ + K·(price1 − x⁻·price2)
//!           P  = (1 − K)·P⁻
//! ```

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanState {
    /// Hedge ratio estimate.
    pub x: f64,
    /// Estimate variance.
    pub p: f64,
    /// Process variance.
    pub q: f64,
    /// Observation variance.
    pub r: f64,
}

impl Default for KalmanState {
    fn default() -> Self {
        Self::new(0.01, 0.1, 0.0, 1.0)
    }
}

impl KalmanState {
    pub fn new(q: f64, r: f64, initial_beta: f64, initial_variance: f64) -> Self {
        Self {
            x: initial_beta,
            p: initial_variance,
            q,
            r,
        }
    }

    /// One predict + correct cycle. Returns the next state; `self` is untouched.
    ///
    /// A non-finite observation or a vanishing innovation variance leaves the
    /// state as it was.
    #[must_use]
    pub fn step(self, price1: f64, price2: f64) -> KalmanState {
        if !price1.is_finite() || !price2.is_finite() {
            return self;
        }
        let x_pred = self.x;
        let p_pred = self.p + self.q;
        let denom = p_pred + self.r;
        if denom <= 0.0 || !denom.is_finite() {
            return self;
        }
        let gain = p_pred / denom;
        let x = x_pred + gain * (price1 - x_pred * price2);
        let p = (1.0 - gain) * p_pred;
        if !x.is_finite() || !p.is_finite() {
            return self;
        }
        KalmanState {
            x,
            p,
            q: self.q,
            r: self.r,
        }
    }

    /// Variant with the observation scaled by `price2`, i.e. the regression form
    /// `price1 = x·price2 + v`. Matches [`KalmanState::step`] when `price2 == 1`
    /// and stays stable at raw price levels.
    #[must_use]
    pub fn step_scaled(self, price1: f64, price2: f64) -> KalmanState {
        if !price1.is_finite() || !price2.is_finite() {
            return self;
        }
        let x_pred = self.x;
        let p_pred = self.p + self.q;
        let denom = price2 * price2 * p_pred + self.r;
        if denom <= 0.0 || !denom.is_finite() {
            return self;
        }
        let gain = p_pred * price2 / denom;
        let x = x_pred + gain * (price1 - x_pred * price2);
        let p = (1.0 - gain * price2) * p_pred;
        if !x.is_finite() || !p.is_finite() {
            return self;
        }
        KalmanState {
            x,
            p,
            q: self.q,
            r: self.r,
        }
    }

    pub fn hedge_ratio(&self) -> f64 {
        self.x
    }

    /// Share of the hedge-ratio error the next step removes at `price2`.
    ///
    /// A noise-free step maps the error `e` to `(1 - w)·e`, so the estimate
    /// only contracts for `0 < w < 2`. The literal form has `w = K·price2`,
    /// which leaves that band once prices sit well above 1.
    pub fn correction_weight(&self, price2: f64, scaled: bool) -> f64 {
        let p_pred = self.p + self.q;
        if scaled {
            let denom = price2 * price2 * p_pred + self.r;
            if denom > 0.0 {
                p_pred * price2 * price2 / denom
            } else {
                0.0
            }
        } else {
            let denom = p_pred + self.r;
            if denom > 0.0 {
                p_pred / denom * price2
            } else {
                0.0
            }
        }
    }
}
