use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PairTradeConfig;
use crate::pair_stats::PricePoint;
use crate::stats::{self, engle_granger, mean_std, StatsError};
use crate::strategy::PairId;

const P_VALUE_WEIGHT: f64 = 0.6;
const HALF_LIFE_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct ScreeningParams {
    /// Trailing bars used per pair; `0` uses everything available.
    pub window: usize,
    pub min_points: usize,
    pub adf_max_lag: Option<usize>,
    pub coint_p_threshold: f64,
    pub half_life_fallback: f64,
    pub use_half_life: bool,
    pub min_half_life: f64,
    pub max_half_life: f64,
}

impl Default for ScreeningParams {
    fn default() -> Self {
        Self {
            window: 120,
            min_points: 20,
            adf_max_lag: None,
            coint_p_threshold: 0.05,
            half_life_fallback: 100.0,
            use_half_life: true,
            min_half_life: 5.0,
            max_half_life: 30.0,
        }
    }
}

impl From<&PairTradeConfig> for ScreeningParams {
    fn from(cfg: &PairTradeConfig) -> Self {
        Self {
            window: cfg.screen_window(),
            min_points: cfg.min_stat_points,
            adf_max_lag: cfg.adf_max_lag,
            coint_p_threshold: cfg.coint_p_threshold,
            half_life_fallback: cfg.half_life_fallback,
            use_half_life: cfg.use_half_life,
            min_half_life: cfg.min_half_life,
            max_half_life: cfg.max_half_life,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenResult {
    pub pair: PairId,
    pub nobs: usize,
    pub intercept: f64,
    pub hedge_ratio: f64,
    pub adf_statistic: f64,
    pub p_value: f64,
    pub half_life: f64,
    pub spread_std: f64,
    pub eligible: bool,
    pub score: f64,
}

pub fn pair_score(p_value: f64, half_life: f64) -> f64 {
    P_VALUE_WEIGHT * (1.0 - p_value) + HALF_LIFE_WEIGHT / (1.0 + half_life.max(0.0))
}

fn tail(series: &[f64], len: usize) -> &[f64] {
    &series[series.len().saturating_sub(len)..]
}

/// Cointegration and half-life screen for one pair over its trailing window.
pub fn screen_pair(
    pair: &PairId,
    series1: &[f64],
    series2: &[f64],
    params: &ScreeningParams,
) -> Result<ScreenResult, StatsError> {
    let common = series1.len().min(series2.len());
    let len = if params.window == 0 {
        common
    } else {
        params.window.min(common)
    };
    if len < params.min_points {
        return Err(StatsError::InsufficientData {
            needed: params.min_points,
            available: len,
        });
    }
    let y = tail(series1, len);
    let x = tail(series2, len);

    let coint = engle_granger(y, x, params.adf_max_lag)?;
    let spreads: Vec<f64> = y
        .iter()
        .zip(x.iter())
        .map(|(yi, xi)| yi - coint.intercept - coint.hedge_ratio * xi)
        .collect();
    let half_life = stats::half_life(&spreads, params.half_life_fallback)
        .unwrap_or(params.half_life_fallback);
    let spread_std = mean_std(spreads.iter()).map(|(_, s)| s).unwrap_or(0.0);

    let in_band = params.min_half_life <= half_life && half_life <= params.max_half_life;
    let eligible =
        coint.p_value <= params.coint_p_threshold && (!params.use_half_life || in_band);

    Ok(ScreenResult {
        pair: pair.clone(),
        nobs: len,
        intercept: coint.intercept,
        hedge_ratio: coint.hedge_ratio,
        adf_statistic: coint.adf_statistic,
        p_value: coint.p_value,
        half_life,
        spread_std,
        eligible,
        score: pair_score(coint.p_value, half_life),
    })
}

/// Closes of both legs at the timestamps they share, oldest first. Both
/// inputs must be sorted by timestamp.
pub fn align_closes(leg1: &[PricePoint], leg2: &[PricePoint]) -> (Vec<f64>, Vec<f64>) {
    let mut out1 = Vec::with_capacity(leg1.len().min(leg2.len()));
    let mut out2 = Vec::with_capacity(out1.capacity());
    let (mut i, mut j) = (0, 0);
    while i < leg1.len() && j < leg2.len() {
        match leg1[i].ts.cmp(&leg2[j].ts) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out1.push(leg1[i].price);
                out2.push(leg2[j].price);
                i += 1;
                j += 1;
            }
        }
    }
    (out1, out2)
}

/// Screens every pair concurrently, at most `max_workers` at a time.
///
/// Each pair is screened on the bars where both legs have a price. Pairs with
/// missing history or failing fits are logged and left out.
pub async fn screen_universe(
    histories: Arc<HashMap<String, Vec<PricePoint>>>,
    pairs: &[PairId],
    params: &ScreeningParams,
    max_workers: usize,
) -> HashMap<PairId, ScreenResult> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let params = Arc::new(params.clone());
    let mut join_set: JoinSet<(PairId, Option<ScreenResult>)> = JoinSet::new();

    for pair in pairs.iter() {
        if !histories.contains_key(&pair.base) || !histories.contains_key(&pair.quote) {
            log::warn!("[SCREEN] pair={} skipped: missing price history", pair);
            continue;
        }
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                log::error!("[SCREEN] worker pool closed; stopping at pair={}", pair);
                break;
            }
        };
        let histories = histories.clone();
        let params = params.clone();
        let pair = pair.clone();
        join_set.spawn(async move {
            let _permit = permit;
            let task_pair = pair.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let (Some(s1), Some(s2)) = (
                    histories.get(&task_pair.base),
                    histories.get(&task_pair.quote),
                ) else {
                    return Err(StatsError::DegenerateInput("missing history".to_string()));
                };
                let (closes1, closes2) = align_closes(s1, s2);
                screen_pair(&task_pair, &closes1, &closes2, &params)
            })
            .await;
            match outcome {
                Ok(Ok(result)) => (pair, Some(result)),
                Ok(Err(err)) => {
                    log::warn!("[SCREEN] pair={} failed: {}", pair, err);
                    (pair, None)
                }
                Err(join_err) => {
                    log::error!("[SCREEN] pair={} worker aborted: {}", pair, join_err);
                    (pair, None)
                }
            }
        });
    }

    let mut results = HashMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((pair, Some(result))) => {
                log::debug!(
                    "[SCREEN] pair={} p={:.4} half_life={:.2} hedge={:.4} eligible={}",
                    pair,
                    result.p_value,
                    result.half_life,
                    result.hedge_ratio,
                    result.eligible
                );
                results.insert(pair, result);
            }
            Ok((_, None)) => {}
            Err(join_err) => log::error!("[SCREEN] screening task panicked: {}", join_err),
        }
    }
    log::info!(
        "[SCREEN] screened {}/{} pairs with {} workers",
        results.len(),
        pairs.len(),
        max_workers.max(1)
    );
    results
}

/// Eligible pairs first, then by descending score. `limit == 0` keeps all.
pub fn rank_pairs(results: &HashMap<PairId, ScreenResult>, limit: usize) -> Vec<ScreenResult> {
    let mut ranked: Vec<ScreenResult> = results.values().cloned().collect();
    ranked.sort_by(|a, b| {
        b.eligible
            .cmp(&a.eligible)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.pair.cmp(&b.pair))
    });
    if limit > 0 {
        ranked.truncate(limit);
    }
    ranked
}
