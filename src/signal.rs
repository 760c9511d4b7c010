use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PairTradeConfig;
use crate::pair_stats::StatsSnapshot;

const QTY_DECIMALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    /// Long leg 1, short leg 2.
    LongSpread,
    /// Short leg 1, long leg 2.
    ShortSpread,
}

impl PositionDirection {
    pub fn label(self) -> &'static str {
        match self {
            PositionDirection::LongSpread => "long_spread",
            PositionDirection::ShortSpread => "short_spread",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairPhase {
    Flat,
    LongSpread,
    ShortSpread,
}

impl From<Option<PositionDirection>> for PairPhase {
    fn from(direction: Option<PositionDirection>) -> Self {
        match direction {
            None => PairPhase::Flat,
            Some(PositionDirection::LongSpread) => PairPhase::LongSpread,
            Some(PositionDirection::ShortSpread) => PairPhase::ShortSpread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TimeStop,
    StopLoss,
    Target,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TimeStop => "time_stop",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Target => "target",
        }
    }
}

/// An open spread position. Exists only between entry and exit.
#[derive(Debug, Clone, PartialEq)]
pub struct PairPositionState {
    pub direction: PositionDirection,
    pub entry_ts: i64,
    pub entry_spread: f64,
    pub entry_price1: f64,
    pub entry_price2: f64,
    pub entry_hedge_ratio: f64,
    /// Signed leg quantities.
    pub qty1: Decimal,
    pub qty2: Decimal,
    pub holding_days: u32,
    pub commission: Decimal,
}

#[derive(Debug, Clone)]
pub struct SignalParams {
    pub entry_z: f64,
    pub exit_z: f64,
    pub max_hold_days: u32,
    pub stop_loss_std_mult: f64,
    pub position_size: f64,
    pub use_vol_sizing: bool,
    pub vol_window: usize,
    pub target_spread_vol: f64,
    pub hedge_ratio_clamp: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            entry_z: 2.0,
            exit_z: 0.5,
            max_hold_days: 10,
            stop_loss_std_mult: 3.0,
            position_size: 0.15,
            use_vol_sizing: true,
            vol_window: 20,
            target_spread_vol: 0.01,
            hedge_ratio_clamp: 5.0,
        }
    }
}

impl From<&PairTradeConfig> for SignalParams {
    fn from(cfg: &PairTradeConfig) -> Self {
        Self {
            entry_z: cfg.entry_z,
            exit_z: cfg.exit_z,
            max_hold_days: cfg.max_hold_days,
            stop_loss_std_mult: cfg.stop_loss_std_mult,
            position_size: cfg.position_size,
            use_vol_sizing: cfg.use_vol_sizing,
            vol_window: cfg.vol_window,
            target_spread_vol: cfg.target_spread_vol,
            hedge_ratio_clamp: cfg.hedge_ratio_clamp,
        }
    }
}

/// Entry side for z-score `z`, if it clears the entry band.
pub fn entry_direction(z: f64, params: &SignalParams) -> Option<PositionDirection> {
    if !z.is_finite() {
        return None;
    }
    if z > params.entry_z {
        Some(PositionDirection::ShortSpread)
    } else if z < -params.entry_z {
        Some(PositionDirection::LongSpread)
    } else {
        None
    }
}

/// Exit decision for an open position. `holding_days` must already include the
/// current bar.
pub fn check_exit(
    position: &PairPositionState,
    snapshot: &StatsSnapshot,
    params: &SignalParams,
) -> Option<ExitReason> {
    if position.holding_days >= params.max_hold_days {
        return Some(ExitReason::TimeStop);
    }
    if let (Some(spread), Some(std)) = (snapshot.spread, snapshot.spread_std) {
        let threshold = params.stop_loss_std_mult * std;
        if (spread - position.entry_spread).abs() > threshold {
            return Some(ExitReason::StopLoss);
        }
    }
    match snapshot.zscore {
        Some(z) if z.abs() < params.exit_z => Some(ExitReason::Target),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntrySizing {
    pub notional: f64,
    pub hedge_ratio: f64,
    pub qty1: Decimal,
    pub qty2: Decimal,
}

/// Leg sizes for a new position.
///
/// Notional is `portfolio_value * position_size`, optionally scaled by
/// `target_spread_vol / recent_vol` but never above that base. Returns `None`
/// when either price is not positive or the result is not representable.
pub fn size_entry(
    portfolio_value: f64,
    hedge_ratio: f64,
    price1: f64,
    price2: f64,
    recent_vol: Option<f64>,
    direction: PositionDirection,
    params: &SignalParams,
) -> Option<EntrySizing> {
    if !(price1 > 0.0 && price2 > 0.0) || !portfolio_value.is_finite() {
        return None;
    }
    let base = portfolio_value * params.position_size;
    let notional = match recent_vol {
        Some(vol) if params.use_vol_sizing && vol > 0.0 => {
            (base * params.target_spread_vol / vol).min(base)
        }
        _ => base,
    };
    if !(notional > 0.0) {
        return None;
    }
    let clamp = params.hedge_ratio_clamp.abs();
    let hedge = hedge_ratio.clamp(-clamp, clamp);
    let leg1 = notional / price1;
    let leg2 = notional * hedge / price2;
    let (qty1, qty2) = match direction {
        PositionDirection::LongSpread => (leg1, -leg2),
        PositionDirection::ShortSpread => (-leg1, leg2),
    };
    Some(EntrySizing {
        notional,
        hedge_ratio: hedge,
        qty1: Decimal::from_f64(qty1)?.round_dp(QTY_DECIMALS),
        qty2: Decimal::from_f64(qty2)?.round_dp(QTY_DECIMALS),
    })
}

/// Relative return of a spread position closed at the given prices, using the
/// hedge ratio recorded at entry.
pub fn spread_return(position: &PairPositionState, price1: f64, price2: f64) -> f64 {
    spread_return_between(
        position.direction,
        position.entry_hedge_ratio,
        (position.entry_price1, position.entry_price2),
        (price1, price2),
    )
}

/// Same as [`spread_return`] for a round trip known only by its prices.
pub fn spread_return_between(
    direction: PositionDirection,
    hedge_ratio: f64,
    entry: (f64, f64),
    exit: (f64, f64),
) -> f64 {
    let (entry1, entry2) = entry;
    let (exit1, exit2) = exit;
    match direction {
        PositionDirection::LongSpread => {
            (exit1 / entry1 - 1.0) - (exit2 / entry2 - 1.0) * hedge_ratio
        }
        PositionDirection::ShortSpread => {
            (entry1 / exit1 - 1.0) - (entry2 / exit2 - 1.0) * hedge_ratio
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(spread: f64, zscore: f64, spread_std: f64) -> StatsSnapshot {
        StatsSnapshot {
            ready: true,
            ts: 0,
            price1: 100.0,
            price2: 50.0,
            hedge_ratio: Some(2.0),
            spread: Some(spread),
            zscore: Some(zscore),
            half_life: Some(10.0),
            spread_mean: Some(0.0),
            spread_std: Some(spread_std),
            window_len: 60,
            spread_len: 60,
        }
    }

    fn position(direction: PositionDirection, entry_spread: f64) -> PairPositionState {
        PairPositionState {
            direction,
            entry_ts: 0,
            entry_spread,
            entry_price1: 100.0,
            entry_price2: 50.0,
            entry_hedge_ratio: 2.0,
            qty1: dec!(1),
            qty2: dec!(-2),
            holding_days: 1,
            commission: Decimal::ZERO,
        }
    }

    #[test]
    fn entry_direction_follows_sign() {
        let params = SignalParams::default();
        assert_eq!(entry_direction(2.5, &params), Some(PositionDirection::ShortSpread));
        assert_eq!(entry_direction(-2.5, &params), Some(PositionDirection::LongSpread));
        assert_eq!(entry_direction(2.0, &params), None);
        assert_eq!(entry_direction(f64::NAN, &params), None);
    }

    #[test]
    fn no_bar_both_enters_and_exits() {
        let configs = [(2.0, 0.5), (1.0, 0.99), (3.0, 0.0), (0.5, 0.25)];
        for (entry_z, exit_z) in configs {
            let params = SignalParams {
                entry_z,
                exit_z,
                ..SignalParams::default()
            };
            let mut z = -6.0;
            while z <= 6.0 {
                let enters = entry_direction(z, &params).is_some();
                let pos = position(PositionDirection::LongSpread, 0.0);
                let exits_on_target =
                    check_exit(&pos, &snapshot(0.0, z, 1.0), &params) == Some(ExitReason::Target);
                assert!(
                    !(enters && exits_on_target),
                    "z={} entry_z={} exit_z={}",
                    z,
                    entry_z,
                    exit_z
                );
                z += 0.01;
            }
        }
    }

    #[test]
    fn time_stop_checked_before_everything() {
        let params = SignalParams::default();
        let mut pos = position(PositionDirection::ShortSpread, 0.0);
        pos.holding_days = params.max_hold_days;
        assert_eq!(
            check_exit(&pos, &snapshot(100.0, 0.1, 1.0), &params),
            Some(ExitReason::TimeStop)
        );
    }

    #[test]
    fn stop_loss_ignores_zscore() {
        let params = SignalParams::default();
        let pos = position(PositionDirection::LongSpread, 1.0);
        // 3.5 std away from entry while z is deep in entry territory
        let snap = snapshot(1.0 - 3.5 * 0.8, -4.0, 0.8);
        assert_eq!(check_exit(&pos, &snap, &params), Some(ExitReason::StopLoss));
        let snap = snapshot(1.0 + 2.9 * 0.8, -4.0, 0.8);
        assert_eq!(check_exit(&pos, &snap, &params), None);
    }

    #[test]
    fn target_exit_inside_band() {
        let params = SignalParams::default();
        let pos = position(PositionDirection::LongSpread, 0.0);
        assert_eq!(
            check_exit(&pos, &snapshot(0.1, 0.3, 1.0), &params),
            Some(ExitReason::Target)
        );
        assert_eq!(check_exit(&pos, &snapshot(0.1, 0.6, 1.0), &params), None);
    }

    #[test]
    fn sizing_caps_at_base_notional() {
        let params = SignalParams::default();
        // tiny vol would lever up; capped at 100_000 * 0.15
        let sizing = size_entry(
            100_000.0,
            1.0,
            100.0,
            50.0,
            Some(0.0001),
            PositionDirection::LongSpread,
            &params,
        )
        .unwrap();
        assert!((sizing.notional - 15_000.0).abs() < 1e-6);
        assert_eq!(sizing.qty1, dec!(150));
        assert_eq!(sizing.qty2, dec!(-300));
    }

    #[test]
    fn sizing_scales_down_with_volatility() {
        let params = SignalParams::default();
        let sizing = size_entry(
            100_000.0,
            2.0,
            100.0,
            50.0,
            Some(0.1),
            PositionDirection::ShortSpread,
            &params,
        )
        .unwrap();
        assert!((sizing.notional - 1_500.0).abs() < 1e-6);
        assert_eq!(sizing.qty1, dec!(-15));
        assert_eq!(sizing.qty2, dec!(60));
    }

    #[test]
    fn sizing_clamps_hedge_ratio() {
        let params = SignalParams {
            use_vol_sizing: false,
            ..SignalParams::default()
        };
        let sizing = size_entry(
            10_000.0,
            12.0,
            10.0,
            10.0,
            None,
            PositionDirection::LongSpread,
            &params,
        )
        .unwrap();
        assert_eq!(sizing.hedge_ratio, 5.0);
        assert_eq!(sizing.qty1, dec!(150));
        assert_eq!(sizing.qty2, dec!(-750));
    }

    #[test]
    fn sizing_rejects_non_positive_prices() {
        let params = SignalParams::default();
        assert!(size_entry(1e5, 1.0, 0.0, 10.0, None, PositionDirection::LongSpread, &params).is_none());
        assert!(size_entry(1e5, 1.0, 10.0, -1.0, None, PositionDirection::LongSpread, &params).is_none());
    }

    #[test]
    fn spread_return_by_direction() {
        let long = position(PositionDirection::LongSpread, 0.0);
        // leg1 +10%, leg2 flat
        assert!((spread_return(&long, 110.0, 50.0) - 0.1).abs() < 1e-12);
        let short = position(PositionDirection::ShortSpread, 0.0);
        // leg1 falls to 80 -> 100/80 - 1 = 0.25
        assert!((spread_return(&short, 80.0, 50.0) - 0.25).abs() < 1e-12);
    }
}
