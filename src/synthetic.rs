//! Seeded generator for a cointegrated pair, used by demo runs and tests.
//!
//! Leg 2 follows a geometric random walk. Leg 1 tracks `alpha + beta * leg2`
//! plus an AR(1) residual, with occasional shocks pushed into the residual so
//! the spread has something to revert from.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::ports::replay_feed::{ReplayEntry, ReplaySymbolSnapshot};
use crate::stats::StatsError;

const PRICE_DECIMALS: u32 = 4;
const MIN_PRICE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct SyntheticPairParams {
    pub base: String,
    pub quote: String,
    pub bars: usize,
    pub start_ts: i64,
    pub bar_interval_ms: i64,
    pub start_price: f64,
    /// Per-bar log-return volatility of leg 2.
    pub step_vol: f64,
    pub alpha: f64,
    pub beta: f64,
    /// AR(1) coefficient of the residual. Must be in `[0, 1)`.
    pub ar_coeff: f64,
    pub noise_std: f64,
    pub shock_probability: f64,
    pub shock_size: f64,
}

impl Default for SyntheticPairParams {
    fn default() -> Self {
        Self {
            base: "AAA".to_string(),
            quote: "BBB".to_string(),
            bars: 500,
            start_ts: 1_704_067_200_000,
            bar_interval_ms: 86_400_000,
            start_price: 100.0,
            step_vol: 0.01,
            alpha: 5.0,
            beta: 1.5,
            ar_coeff: 0.8,
            noise_std: 0.5,
            shock_probability: 0.02,
            shock_size: 4.0,
        }
    }
}

impl SyntheticPairParams {
    fn validate(&self) -> Result<(), StatsError> {
        if self.base == self.quote || self.base.is_empty() || self.quote.is_empty() {
            return Err(StatsError::DegenerateInput(format!(
                "synthetic pair needs two distinct symbols, got {}/{}",
                self.base, self.quote
            )));
        }
        if !(0.0..1.0).contains(&self.ar_coeff) {
            return Err(StatsError::DegenerateInput(format!(
                "ar_coeff {} outside [0, 1)",
                self.ar_coeff
            )));
        }
        if !(0.0..=1.0).contains(&self.shock_probability) {
            return Err(StatsError::DegenerateInput(format!(
                "shock_probability {} outside [0, 1]",
                self.shock_probability
            )));
        }
        if self.bar_interval_ms <= 0 || self.start_price <= 0.0 {
            return Err(StatsError::DegenerateInput(
                "bar interval and start price must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn snapshot(price: f64) -> ReplaySymbolSnapshot {
    let price = Decimal::from_f64(price.max(MIN_PRICE))
        .unwrap_or(Decimal::ONE)
        .round_dp(PRICE_DECIMALS);
    ReplaySymbolSnapshot {
        price,
        volume: None,
    }
}

/// Generates `params.bars` bars for one cointegrated pair. Same seed, same output.
pub fn cointegrated_pair(
    params: &SyntheticPairParams,
    seed: u64,
) -> Result<Vec<ReplayEntry>, StatsError> {
    params.validate()?;
    let step = Normal::new(0.0, params.step_vol)
        .map_err(|e| StatsError::DegenerateInput(format!("step_vol: {}", e)))?;
    let noise = Normal::new(0.0, params.noise_std)
        .map_err(|e| StatsError::DegenerateInput(format!("noise_std: {}", e)))?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut log_price = params.start_price.ln();
    let mut residual = 0.0;
    let mut entries = Vec::with_capacity(params.bars);
    for i in 0..params.bars {
        log_price += step.sample(&mut rng);
        residual = params.ar_coeff * residual + noise.sample(&mut rng);
        if params.shock_probability > 0.0 && rng.gen_bool(params.shock_probability) {
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            residual += sign * params.shock_size;
        }
        let price2 = log_price.exp();
        let price1 = params.alpha + params.beta * price2 + residual;

        let mut prices = HashMap::with_capacity(2);
        prices.insert(params.base.clone(), snapshot(price1));
        prices.insert(params.quote.clone(), snapshot(price2));
        entries.push(ReplayEntry {
            timestamp: params.start_ts + i as i64 * params.bar_interval_ms,
            prices,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::engle_granger;

    fn closes(entries: &[ReplayEntry], symbol: &str) -> Vec<f64> {
        entries.iter().filter_map(|e| e.close(symbol)).collect()
    }

    #[test]
    fn same_seed_same_series() {
        let params = SyntheticPairParams {
            bars: 50,
            ..SyntheticPairParams::default()
        };
        let a = cointegrated_pair(&params, 7).unwrap();
        let b = cointegrated_pair(&params, 7).unwrap();
        let c = cointegrated_pair(&params, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 50);
        assert!(a.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    }

    #[test]
    fn generated_legs_are_cointegrated() {
        let params = SyntheticPairParams {
            bars: 300,
            shock_probability: 0.0,
            ..SyntheticPairParams::default()
        };
        let entries = cointegrated_pair(&params, 11).unwrap();
        let y = closes(&entries, "AAA");
        let x = closes(&entries, "BBB");
        let res = engle_granger(&y, &x, None).unwrap();
        assert!(res.p_value < 0.05, "p={}", res.p_value);
        assert!((res.hedge_ratio - 1.5).abs() < 0.2, "hedge={}", res.hedge_ratio);
    }

    #[test]
    fn rejects_bad_parameters() {
        let same = SyntheticPairParams {
            quote: "AAA".to_string(),
            ..SyntheticPairParams::default()
        };
        assert!(cointegrated_pair(&same, 1).is_err());
        let explosive = SyntheticPairParams {
            ar_coeff: 1.0,
            ..SyntheticPairParams::default()
        };
        assert!(cointegrated_pair(&explosive, 1).is_err());
    }
}
