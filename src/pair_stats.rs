use std::collections::VecDeque;

use crate::config::PairTradeConfig;
use crate::stats::{self, engle_granger, mean_std, simple_ols, KalmanState, StatsError};

/// Literal Kalman steps at or above this weight amplify the hedge-ratio error.
const MAX_CORRECTION_WEIGHT: f64 = 2.0;

type SpreadStats = (Option<f64>, Option<f64>, Option<f64>, Option<f64>);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub ts: i64,
    pub price: f64,
}

/// Fixed-capacity FIFO window. Oldest entries are evicted once full.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Appends `item`, returning the evicted entry if the window was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    fn pop_back(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn as_deque(&self) -> &VecDeque<T> {
        &self.items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeRatioMode {
    BatchOls,
    Kalman,
}

#[derive(Debug, Clone)]
pub struct StatsParams {
    pub lookback: usize,
    pub min_points: usize,
    pub hedge_mode: HedgeRatioMode,
    pub kalman: KalmanState,
    pub kalman_price_scaled: bool,
    pub half_life_fallback: f64,
    pub coint_p_threshold: f64,
    pub adf_max_lag: Option<usize>,
    pub use_half_life: bool,
    pub min_half_life: f64,
    pub max_half_life: f64,
}

impl Default for StatsParams {
    fn default() -> Self {
        Self {
            lookback: 60,
            min_points: 20,
            hedge_mode: HedgeRatioMode::Kalman,
            kalman: KalmanState::default(),
            kalman_price_scaled: false,
            half_life_fallback: 100.0,
            coint_p_threshold: 0.05,
            adf_max_lag: None,
            use_half_life: true,
            min_half_life: 5.0,
            max_half_life: 30.0,
        }
    }
}

impl From<&PairTradeConfig> for StatsParams {
    fn from(cfg: &PairTradeConfig) -> Self {
        Self {
            lookback: cfg.lookback,
            min_points: cfg.min_stat_points,
            hedge_mode: if cfg.use_kalman {
                HedgeRatioMode::Kalman
            } else {
                HedgeRatioMode::BatchOls
            },
            kalman: KalmanState::new(
                cfg.kalman_q,
                cfg.kalman_r,
                cfg.kalman_initial_beta,
                cfg.kalman_initial_variance,
            ),
            kalman_price_scaled: cfg.kalman_price_scaled,
            half_life_fallback: cfg.half_life_fallback,
            coint_p_threshold: cfg.coint_p_threshold,
            adf_max_lag: cfg.adf_max_lag,
            use_half_life: cfg.use_half_life,
            min_half_life: cfg.min_half_life,
            max_half_life: cfg.max_half_life,
        }
    }
}

/// Per-bar statistics for a pair. `ready == false` means "no signal".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub ready: bool,
    pub ts: i64,
    pub price1: f64,
    pub price2: f64,
    pub hedge_ratio: Option<f64>,
    pub spread: Option<f64>,
    pub zscore: Option<f64>,
    pub half_life: Option<f64>,
    pub spread_mean: Option<f64>,
    pub spread_std: Option<f64>,
    pub window_len: usize,
    pub spread_len: usize,
}

impl StatsSnapshot {
    fn not_ready(ts: i64, price1: f64, price2: f64, window_len: usize, spread_len: usize) -> Self {
        Self {
            ready: false,
            ts,
            price1,
            price2,
            hedge_ratio: None,
            spread: None,
            zscore: None,
            half_life: None,
            spread_mean: None,
            spread_std: None,
            window_len,
            spread_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub eligible: bool,
    pub half_life: Option<f64>,
    pub coint_p_value: Option<f64>,
    pub reason: Option<&'static str>,
}

/// Rolling hedge ratio, spread, z-score and half-life for one pair.
#[derive(Debug, Clone)]
pub struct PairStatsEngine {
    params: StatsParams,
    prices1: RollingWindow<PricePoint>,
    prices2: RollingWindow<PricePoint>,
    spreads: RollingWindow<f64>,
    kalman: KalmanState,
    last: Option<StatsSnapshot>,
}

impl PairStatsEngine {
    pub fn new(params: StatsParams) -> Self {
        let lookback = params.lookback.max(1);
        Self {
            prices1: RollingWindow::new(lookback),
            prices2: RollingWindow::new(lookback),
            spreads: RollingWindow::new(lookback),
            kalman: params.kalman,
            last: None,
            params,
        }
    }

    pub fn params(&self) -> &StatsParams {
        &self.params
    }

    pub fn kalman(&self) -> KalmanState {
        self.kalman
    }

    pub fn last_snapshot(&self) -> Option<&StatsSnapshot> {
        self.last.as_ref()
    }

    pub fn price_window_len(&self) -> usize {
        self.prices1.len().min(self.prices2.len())
    }

    pub fn spread_len(&self) -> usize {
        self.spreads.len()
    }

    pub fn spread_std(&self) -> Option<f64> {
        mean_std(self.spreads.iter()).map(|(_, std)| std)
    }

    /// Standard deviation of the last `window` spreads, once that many exist.
    pub fn recent_spread_vol(&self, window: usize) -> Option<f64> {
        if window == 0 || self.spreads.len() < window {
            return None;
        }
        stats::tail_std(self.spreads.as_deque(), window)
    }

    /// Feeds one bar. Both prices must belong to the same timestamp and bars
    /// must arrive in chronological order.
    ///
    /// On error nothing is retained from this bar.
    pub fn update(
        &mut self,
        ts: i64,
        price1: f64,
        price2: f64,
    ) -> Result<StatsSnapshot, StatsError> {
        if !price1.is_finite() || !price2.is_finite() {
            return Err(StatsError::NonFinite(format!(
                "prices {} / {} at {}",
                price1, price2, ts
            )));
        }

        let evicted1 = self.prices1.push(PricePoint { ts, price: price1 });
        let evicted2 = self.prices2.push(PricePoint { ts, price: price2 });
        let window_len = self.price_window_len();
        if window_len < self.params.lookback {
            let snapshot =
                StatsSnapshot::not_ready(ts, price1, price2, window_len, self.spreads.len());
            self.last = Some(snapshot);
            return Ok(snapshot);
        }

        match self.compute(ts, price1, price2) {
            Ok(snapshot) => {
                self.last = Some(snapshot);
                Ok(snapshot)
            }
            Err(err) => {
                self.prices1.pop_back();
                self.prices2.pop_back();
                if let Some(p) = evicted1 {
                    self.prices1.push_front(p);
                }
                if let Some(p) = evicted2 {
                    self.prices2.push_front(p);
                }
                Err(err)
            }
        }
    }

    fn compute(&mut self, ts: i64, price1: f64, price2: f64) -> Result<StatsSnapshot, StatsError> {
        let (hedge_ratio, next_kalman) = match self.params.hedge_mode {
            HedgeRatioMode::BatchOls => {
                let y: Vec<f64> = self.prices1.iter().map(|p| p.price).collect();
                let x: Vec<f64> = self.prices2.iter().map(|p| p.price).collect();
                let (_, slope) = simple_ols(&y, &x)?;
                (slope, self.kalman)
            }
            HedgeRatioMode::Kalman => {
                let scaled = self.params.kalman_price_scaled;
                let weight = self.kalman.correction_weight(price2, scaled);
                if !(weight > 0.0 && weight < MAX_CORRECTION_WEIGHT) {
                    return Err(StatsError::DegenerateInput(format!(
                        "kalman correction weight {:.3} at price {} would diverge{}",
                        weight,
                        price2,
                        if scaled {
                            ""
                        } else {
                            "; consider kalman_price_scaled"
                        }
                    )));
                }
                let next = if scaled {
                    self.kalman.step_scaled(price1, price2)
                } else {
                    self.kalman.step(price1, price2)
                };
                (next.hedge_ratio(), next)
            }
        };
        if !hedge_ratio.is_finite() {
            return Err(StatsError::NonFinite("hedge ratio".to_string()));
        }
        let spread = price1 - hedge_ratio * price2;
        if !spread.is_finite() {
            return Err(StatsError::NonFinite(format!(
                "spread with hedge ratio {}",
                hedge_ratio
            )));
        }

        let evicted = self.spreads.push(spread);
        let stats = match self.spread_stats(spread) {
            Ok(stats) => stats,
            Err(err) => {
                self.spreads.pop_back();
                if let Some(s) = evicted {
                    self.spreads.push_front(s);
                }
                return Err(err);
            }
        };
        self.kalman = next_kalman;
        let (zscore, half_life, spread_mean, spread_std) = stats;

        Ok(StatsSnapshot {
            ready: zscore.is_some(),
            ts,
            price1,
            price2,
            hedge_ratio: Some(hedge_ratio),
            spread: Some(spread),
            zscore,
            half_life,
            spread_mean,
            spread_std,
            window_len: self.price_window_len(),
            spread_len: self.spreads.len(),
        })
    }

    /// z-score, half-life, mean and std of the spread window, once it holds
    /// `min_points` values.
    fn spread_stats(&self, spread: f64) -> Result<SpreadStats, StatsError> {
        if self.spreads.len() < self.params.min_points {
            return Ok((None, None, None, None));
        }
        let (mean, std) = mean_std(self.spreads.iter()).unwrap_or((spread, 0.0));
        if !mean.is_finite() || !std.is_finite() {
            return Err(StatsError::NonFinite(format!(
                "spread mean {} / std {}",
                mean, std
            )));
        }
        let z = if std == 0.0 { 0.0 } else { (spread - mean) / std };
        if !z.is_finite() {
            return Err(StatsError::NonFinite(format!("z-score {}", z)));
        }
        let series: Vec<f64> = self.spreads.iter().copied().collect();
        let hl = stats::half_life(&series, self.params.half_life_fallback);
        Ok((Some(z), hl, Some(mean), Some(std)))
    }

    /// Eligibility of the pair for new entries, with the figures behind it.
    pub fn eligibility(&self) -> Result<Eligibility, StatsError> {
        let half_life = self.last.and_then(|s| s.half_life);
        let Some(hl) = half_life else {
            return Ok(Eligibility {
                eligible: false,
                half_life: None,
                coint_p_value: None,
                reason: Some("half_life_unavailable"),
            });
        };

        let mut coint_p_value = None;
        if self.price_window_len() >= self.params.lookback {
            let y: Vec<f64> = self.prices1.iter().map(|p| p.price).collect();
            let x: Vec<f64> = self.prices2.iter().map(|p| p.price).collect();
            let res = engle_granger(&y, &x, self.params.adf_max_lag)?;
            coint_p_value = Some(res.p_value);
            if res.p_value > self.params.coint_p_threshold {
                return Ok(Eligibility {
                    eligible: false,
                    half_life,
                    coint_p_value,
                    reason: Some("not_cointegrated"),
                });
            }
        }

        if self.params.use_half_life
            && !(self.params.min_half_life <= hl && hl <= self.params.max_half_life)
        {
            return Ok(Eligibility {
                eligible: false,
                half_life,
                coint_p_value,
                reason: Some("half_life_out_of_band"),
            });
        }

        Ok(Eligibility {
            eligible: true,
            half_life,
            coint_p_value,
            reason: None,
        })
    }

    /// `true` when the pair may take new entries. Fit failures count as ineligible.
    pub fn is_eligible(&self) -> bool {
        match self.eligibility() {
            Ok(e) => e.eligible,
            Err(err) => {
                log::warn!("[STATS] eligibility check failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lookback: usize, mode: HedgeRatioMode) -> StatsParams {
        StatsParams {
            lookback,
            hedge_mode: mode,
            ..StatsParams::default()
        }
    }

    fn scaled_kalman(lookback: usize) -> StatsParams {
        StatsParams {
            kalman_price_scaled: true,
            ..params(lookback, HedgeRatioMode::Kalman)
        }
    }

    fn wave(i: usize) -> (f64, f64) {
        let p2 = 50.0 + (i as f64 * 0.05).sin() * 5.0 + i as f64 * 0.02;
        let noise = ((i * 37) % 11) as f64 / 10.0 - 0.5;
        (2.0 * p2 + 3.0 + noise, p2)
    }

    #[test]
    fn rolling_window_evicts_oldest() {
        let mut w = RollingWindow::new(3);
        assert_eq!(w.push(1), None);
        assert_eq!(w.push(2), None);
        assert_eq!(w.push(3), None);
        assert!(w.is_full());
        assert_eq!(w.push(4), Some(1));
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn not_ready_until_lookback_reached() {
        let lookback = 30;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::BatchOls));
        for i in 0..lookback - 1 {
            let (p1, p2) = wave(i);
            let snap = engine.update(i as i64, p1, p2).unwrap();
            assert!(!snap.ready);
            assert!(snap.zscore.is_none());
            assert!(!engine.is_eligible());
        }
    }

    #[test]
    fn windows_never_exceed_lookback() {
        let lookback = 25;
        let mut engine = PairStatsEngine::new(scaled_kalman(lookback));
        for i in 0..200 {
            let (p1, p2) = wave(i);
            let snap = engine.update(i as i64, p1, p2).unwrap();
            assert!(snap.window_len <= lookback);
            assert!(snap.spread_len <= lookback);
            assert!(engine.spread_len() <= lookback);
        }
        assert_eq!(engine.spread_len(), lookback);
    }

    #[test]
    fn zscore_withheld_below_twenty_spreads() {
        let lookback = 40;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::BatchOls));
        let mut seen_ready_at = None;
        for i in 0..lookback + 25 {
            let (p1, p2) = wave(i);
            let snap = engine.update(i as i64, p1, p2).unwrap();
            if snap.spread_len < 20 {
                assert!(snap.zscore.is_none());
                assert!(snap.half_life.is_none());
            } else if seen_ready_at.is_none() {
                seen_ready_at = Some(i);
            }
        }
        // first spread at bar lookback-1, twentieth spread 19 bars later
        assert_eq!(seen_ready_at, Some(lookback - 1 + 19));
    }

    #[test]
    fn constant_spread_gives_zero_zscore() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::BatchOls));
        let mut last = None;
        for i in 0..60 {
            let p2 = 10.0 + i as f64;
            last = Some(engine.update(i as i64, 2.0 * p2 + 1.0, p2).unwrap());
        }
        let snap = last.unwrap();
        assert!(snap.ready);
        let z = snap.zscore.unwrap();
        assert!(z.abs() < 1e-6, "z={}", z);
    }

    #[test]
    fn batch_ols_failure_keeps_previous_state() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::BatchOls));
        for i in 0..lookback - 1 {
            engine.update(i as i64, 10.0 + i as f64, 5.0).unwrap();
        }
        let before: Vec<PricePoint> = engine.prices1.iter().copied().collect();
        let err = engine.update(99, 42.0, 5.0).unwrap_err();
        assert!(matches!(err, StatsError::SingularMatrix(_)));
        let after: Vec<PricePoint> = engine.prices1.iter().copied().collect();
        assert_eq!(before, after);
        assert_eq!(engine.spread_len(), 0);
    }

    #[test]
    fn rollback_restores_evicted_points() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::BatchOls));
        for i in 0..lookback {
            let (p1, p2) = wave(i);
            engine.update(i as i64, p1, p2).unwrap();
        }
        let before: Vec<i64> = engine.prices1.iter().map(|p| p.ts).collect();
        assert!(engine.update(100, f64::NAN, 1.0).is_err());
        let after: Vec<i64> = engine.prices1.iter().map(|p| p.ts).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn kalman_mode_threads_state_through_bars() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(scaled_kalman(lookback));
        let start = engine.kalman();
        for i in 0..lookback - 1 {
            let (p1, p2) = wave(i);
            engine.update(i as i64, p1, p2).unwrap();
        }
        assert_eq!(engine.kalman(), start);
        let (p1, p2) = wave(lookback);
        let snap = engine.update(lookback as i64, p1, p2).unwrap();
        let expected = start.step_scaled(p1, p2);
        assert_eq!(engine.kalman(), expected);
        assert_eq!(snap.hedge_ratio, Some(expected.x));
        assert_eq!(snap.spread, Some(p1 - expected.x * p2));
    }

    #[test]
    fn literal_kalman_threads_state_at_unit_prices() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(params(lookback, HedgeRatioMode::Kalman));
        let mut state = engine.kalman();
        for i in 0..80 {
            let p2 = 1.0 + 0.1 * (i as f64 * 0.3).sin();
            let p1 = 2.0 * p2 + 0.01 * (((i * 7) % 5) as f64 - 2.0);
            let snap = engine.update(i as i64, p1, p2).unwrap();
            if i + 1 >= lookback {
                state = state.step(p1, p2);
                assert_eq!(snap.hedge_ratio, Some(state.x));
            }
        }
        assert_eq!(engine.kalman(), state);
        assert!((state.x - 2.0).abs() < 0.1, "x={}", state.x);
    }

    #[test]
    fn default_kalman_at_realistic_prices_never_reports_non_finite_stats() {
        let lookback = 60;
        let mut engine = PairStatsEngine::new(StatsParams::default());
        let start = engine.kalman();
        let mut rejected = 0;
        for i in 0..600 {
            let (p1, p2) = wave(i);
            match engine.update(i as i64, p1, p2) {
                Ok(snap) => {
                    if snap.ready {
                        assert!(snap.spread.unwrap().is_finite());
                        assert!(snap.zscore.unwrap().is_finite());
                        assert!(snap.spread_std.unwrap().is_finite());
                    }
                }
                Err(StatsError::DegenerateInput(_)) => rejected += 1,
                Err(other) => panic!("bar {}: unexpected error {}", i, other),
            }
            let last = engine.last_snapshot().unwrap();
            assert!(!last.ready || last.zscore.unwrap().is_finite());
        }
        // the literal step overshoots at price ~50, so every full-window bar is refused
        assert_eq!(rejected, 600 - (lookback - 1));
        assert_eq!(engine.kalman(), start);
        assert_eq!(engine.spread_len(), 0);
        assert!(!engine.last_snapshot().unwrap().ready);
    }

    #[test]
    fn scaled_kalman_at_realistic_prices_tracks_hedge_ratio() {
        let mut engine = PairStatsEngine::new(StatsParams {
            kalman_price_scaled: true,
            ..StatsParams::default()
        });
        let mut last = None;
        for i in 0..600 {
            let (p1, p2) = wave(i);
            let snap = engine.update(i as i64, p1, p2).unwrap();
            if snap.ready {
                assert!(snap.zscore.unwrap().is_finite());
            }
            last = Some(snap);
        }
        let snap = last.unwrap();
        assert!(snap.ready);
        let hedge = snap.hedge_ratio.unwrap();
        assert!(hedge > 1.5 && hedge < 2.5, "hedge={}", hedge);
    }

    #[test]
    fn non_finite_spread_stats_roll_back_the_bar() {
        let lookback = 20;
        let mut engine = PairStatsEngine::new(StatsParams {
            min_points: 2,
            ..params(lookback, HedgeRatioMode::BatchOls)
        });
        for i in 0..lookback + 5 {
            let (p1, p2) = wave(i);
            engine.update(i as i64, p1, p2).unwrap();
        }
        let spreads_before: Vec<f64> = engine.spreads.iter().copied().collect();
        let prices_before: Vec<PricePoint> = engine.prices1.iter().copied().collect();
        let last_before = *engine.last_snapshot().unwrap();

        let (_, p2) = wave(lookback + 5);
        let err = engine.update(1_000, 1e300, p2).unwrap_err();
        assert!(matches!(err, StatsError::NonFinite(_)), "{}", err);

        let spreads_after: Vec<f64> = engine.spreads.iter().copied().collect();
        let prices_after: Vec<PricePoint> = engine.prices1.iter().copied().collect();
        assert_eq!(spreads_before, spreads_after);
        assert_eq!(prices_before, prices_after);
        assert_eq!(*engine.last_snapshot().unwrap(), last_before);
    }

    #[test]
    fn half_life_band_gates_eligibility() {
        let lookback = 60;
        let mut p = params(lookback, HedgeRatioMode::BatchOls);
        p.min_half_life = 1000.0;
        p.max_half_life = 2000.0;
        let mut engine = PairStatsEngine::new(p);
        for i in 0..150 {
            let (p1, p2) = wave(i);
            engine.update(i as i64, p1, p2).unwrap();
        }
        let e = engine.eligibility().unwrap();
        assert!(!e.eligible);
        assert!(e.half_life.is_some());
    }
}
