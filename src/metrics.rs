use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::strategy::TradeRecord;

/// End-of-run performance figures. Ratios are annualised with `bars_per_year`
/// and fall back to 0 when undefined.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceSummary {
    pub bars: usize,
    pub initial_value: f64,
    pub final_value: f64,
    pub total_return_usd: f64,
    pub total_return_pct: f64,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub annualized_volatility_pct: f64,
    pub max_drawdown_usd: f64,
    pub max_drawdown_pct: f64,
    pub cagr_pct: f64,
    pub calmar_ratio: f64,
    pub total_commission: f64,
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl PerformanceSummary {
    pub fn from_run(equity_curve: &[f64], trades: &[TradeRecord], bars_per_year: f64) -> Self {
        let initial_value = equity_curve.first().copied().unwrap_or(0.0);
        let final_value = equity_curve.last().copied().unwrap_or(initial_value);
        let total_return_usd = final_value - initial_value;
        let total_return_pct = if initial_value != 0.0 {
            total_return_usd / initial_value * 100.0
        } else {
            0.0
        };

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let (sharpe_ratio, sortino_ratio, annualized_volatility_pct) =
            annualised_ratios(&returns, bars_per_year);

        let (max_drawdown_usd, max_drawdown_pct) = max_drawdown(equity_curve);

        let years = equity_curve.len() as f64 / bars_per_year;
        let cagr_pct = if years > 0.0 && initial_value > 0.0 && final_value > 0.0 {
            finite_or_zero(((final_value / initial_value).powf(1.0 / years) - 1.0) * 100.0)
        } else {
            0.0
        };
        let calmar_ratio = if max_drawdown_pct != 0.0 {
            cagr_pct / max_drawdown_pct.abs()
        } else {
            0.0
        };

        let winning_trades = trades.iter().filter(|t| t.is_win()).count();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winning_trades as f64 / trades.len() as f64
        };
        let total_commission = trades
            .iter()
            .map(|t| t.commission)
            .sum::<Decimal>()
            .to_f64()
            .unwrap_or(0.0);

        Self {
            bars: equity_curve.len(),
            initial_value,
            final_value,
            total_return_usd,
            total_return_pct,
            trade_count: trades.len(),
            winning_trades,
            win_rate,
            sharpe_ratio,
            sortino_ratio,
            annualized_volatility_pct,
            max_drawdown_usd,
            max_drawdown_pct,
            cagr_pct,
            calmar_ratio,
            total_commission,
        }
    }

    pub fn log(&self) {
        log::info!("[SUMMARY] bars={} trades={}", self.bars, self.trade_count);
        log::info!(
            "[SUMMARY] total return {:.2} USD ({:.2}%), final value {:.2}",
            self.total_return_usd,
            self.total_return_pct,
            self.final_value
        );
        log::info!(
            "[SUMMARY] win rate {:.2}% ({} of {})",
            self.win_rate * 100.0,
            self.winning_trades,
            self.trade_count
        );
        log::info!(
            "[SUMMARY] sharpe {:.3} sortino {:.3} vol {:.2}%",
            self.sharpe_ratio,
            self.sortino_ratio,
            self.annualized_volatility_pct
        );
        log::info!(
            "[SUMMARY] max drawdown {:.2} USD ({:.2}%), CAGR {:.2}%, calmar {:.3}",
            self.max_drawdown_usd,
            self.max_drawdown_pct,
            self.cagr_pct,
            self.calmar_ratio
        );
    }
}

fn annualised_ratios(returns: &[f64], bars_per_year: f64) -> (f64, f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0, 0.0);
    }
    let mean = returns.iter().mean();
    let std = returns.iter().std_dev();
    if !std.is_finite() || std == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let ann_mean = mean * bars_per_year;
    let ann_std = std * bars_per_year.sqrt();
    let sharpe = finite_or_zero(ann_mean / ann_std);

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_std = if downside.len() >= 2 {
        downside.iter().std_dev() * bars_per_year.sqrt()
    } else {
        0.0
    };
    let sortino = if downside_std > 0.0 {
        finite_or_zero(ann_mean / downside_std)
    } else {
        0.0
    };
    (sharpe, sortino, ann_std * 100.0)
}

/// Deepest fall from the running peak, in value and percent (both `<= 0`).
fn max_drawdown(equity_curve: &[f64]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut worst_usd = 0.0_f64;
    let mut worst_pct = 0.0_f64;
    for &v in equity_curve {
        peak = peak.max(v);
        let dd = v - peak;
        worst_usd = worst_usd.min(dd);
        if peak > 0.0 {
            worst_pct = worst_pct.min(dd / peak * 100.0);
        }
    }
    (worst_usd, worst_pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ExitReason, PositionDirection};
    use crate::strategy::PairId;
    use rust_decimal_macros::dec;

    fn trade(exit1: Decimal) -> TradeRecord {
        TradeRecord {
            pair: PairId::new("AAA", "BBB"),
            direction: PositionDirection::LongSpread,
            reason: ExitReason::Target,
            entry_ts: 0,
            exit_ts: 1,
            entry_price1: dec!(100),
            entry_price2: dec!(50),
            exit_price1: exit1,
            exit_price2: dec!(50),
            hedge_ratio: 2.0,
            qty1: dec!(1),
            qty2: dec!(-2),
            holding_days: 1,
            spread_return: 0.0,
            commission: dec!(0.5),
        }
    }

    #[test]
    fn drawdown_and_returns() {
        let curve = [100.0, 110.0, 99.0, 104.5, 121.0];
        let summary = PerformanceSummary::from_run(&curve, &[], 252.0);
        assert!((summary.total_return_pct - 21.0).abs() < 1e-9);
        assert!((summary.max_drawdown_usd + 11.0).abs() < 1e-9);
        assert!((summary.max_drawdown_pct + 10.0).abs() < 1e-9);
        assert!(summary.sharpe_ratio > 0.0);
        assert!(summary.annualized_volatility_pct > 0.0);
        assert!(summary.calmar_ratio > 0.0);
    }

    #[test]
    fn flat_curve_has_zero_ratios() {
        let curve = [100.0; 10];
        let summary = PerformanceSummary::from_run(&curve, &[], 252.0);
        assert_eq!(summary.sharpe_ratio, 0.0);
        assert_eq!(summary.sortino_ratio, 0.0);
        assert_eq!(summary.max_drawdown_pct, 0.0);
        assert_eq!(summary.cagr_pct, 0.0);
        assert_eq!(summary.calmar_ratio, 0.0);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        // returns: +10%, -10%, +10%
        let curve = [100.0, 110.0, 99.0, 108.9];
        let summary = PerformanceSummary::from_run(&curve, &[], 4.0);
        let r = [0.1, -0.1, 0.1];
        let mean = r.iter().sum::<f64>() / 3.0;
        let var = r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 2.0;
        let expected = (mean * 4.0) / (var.sqrt() * 2.0);
        assert!((summary.sharpe_ratio - expected).abs() < 1e-9);
        // a single negative return leaves downside deviation undefined
        assert_eq!(summary.sortino_ratio, 0.0);
    }

    #[test]
    fn win_rate_counts_net_pnl() {
        let trades = [trade(dec!(101)), trade(dec!(100.2)), trade(dec!(99))];
        let summary = PerformanceSummary::from_run(&[100.0, 100.0], &trades, 252.0);
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.winning_trades, 1);
        assert!((summary.win_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((summary.total_commission - 1.5).abs() < 1e-12);
    }
}
