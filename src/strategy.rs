//! Event-driven pair-trading strategy.
//!
//! A driver feeds bars, fills and timer ticks through [`StrategyContext`]; the
//! strategy answers with [`TradeIntent`]s and never touches the ledger itself.
//! All per-pair state lives in one map owned by [`PairTradeStrategy`].

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::config::PairTradeConfig;
use crate::pair_stats::{PairStatsEngine, StatsParams};
use crate::ports::replay_feed::ReplayEntry;
use crate::risk::DrawdownTracker;
use crate::signal::{
    check_exit, entry_direction, size_entry, spread_return, spread_return_between, ExitReason,
    PairPhase,
    PairPositionState, PositionDirection, SignalParams,
};
use crate::trade::intent::{LegOrder, OrderFill, TradeIntent};

const STATS_ERROR_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct PairId {
    pub base: String,
    pub quote: String,
}

impl PairId {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl From<PairId> for String {
    fn from(pair: PairId) -> Self {
        pair.to_string()
    }
}

impl std::str::FromStr for PairId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut split = trimmed.split('/');
        match (split.next(), split.next(), split.next()) {
            (Some(base), Some(quote), None)
                if !base.trim().is_empty() && !quote.trim().is_empty() =>
            {
                Ok(PairId::new(base.trim(), quote.trim()))
            }
            _ => Err(format!("invalid pair: {}", trimmed)),
        }
    }
}

/// Closing prices of every instrument at one timestamp (milliseconds).
#[derive(Debug, Clone, Default)]
pub struct BarSlice {
    pub ts: i64,
    pub prices: HashMap<String, f64>,
}

impl BarSlice {
    pub fn new(ts: i64) -> Self {
        Self {
            ts,
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

impl From<&ReplayEntry> for BarSlice {
    fn from(entry: &ReplayEntry) -> Self {
        Self {
            ts: entry.timestamp,
            prices: entry
                .prices
                .iter()
                .filter_map(|(sym, snap)| snap.price.to_f64().map(|p| (sym.clone(), p)))
                .collect(),
        }
    }
}

/// Read-only portfolio figures the strategy sizes and gates against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioView {
    pub value: f64,
    pub cash: f64,
}

pub trait StrategyContext {
    fn on_bar(&mut self, bar: &BarSlice, portfolio: &PortfolioView) -> Vec<TradeIntent>;
    fn on_order_filled(&mut self, fill: &OrderFill);
    fn on_timer(&mut self, now: DateTime<Utc>);
}

#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub stats: StatsParams,
    pub signal: SignalParams,
    pub max_positions: usize,
    pub max_drawdown: f64,
    pub drawdown_release_ratio: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            stats: StatsParams::default(),
            signal: SignalParams::default(),
            max_positions: 3,
            max_drawdown: 0.15,
            drawdown_release_ratio: 0.7,
        }
    }
}

impl From<&PairTradeConfig> for StrategyParams {
    fn from(cfg: &PairTradeConfig) -> Self {
        Self {
            stats: StatsParams::from(cfg),
            signal: SignalParams::from(cfg),
            max_positions: cfg.max_positions,
            max_drawdown: cfg.max_drawdown,
            drawdown_release_ratio: cfg.drawdown_release_ratio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairRuntime {
    pub stats: PairStatsEngine,
    pub position: Option<PairPositionState>,
    pub last_z: Option<f64>,
    /// Bars the statistics engine refused.
    pub stats_errors: u64,
}

impl PairRuntime {
    fn new(params: StatsParams) -> Self {
        Self {
            stats: PairStatsEngine::new(params),
            position: None,
            last_z: None,
            stats_errors: 0,
        }
    }

    pub fn phase(&self) -> PairPhase {
        PairPhase::from(self.position.as_ref().map(|p| p.direction))
    }
}

/// A completed round trip.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub pair: PairId,
    pub direction: PositionDirection,
    pub reason: ExitReason,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub entry_price1: Decimal,
    pub entry_price2: Decimal,
    pub exit_price1: Decimal,
    pub exit_price2: Decimal,
    pub hedge_ratio: f64,
    pub qty1: Decimal,
    pub qty2: Decimal,
    pub holding_days: u32,
    pub spread_return: f64,
    pub commission: Decimal,
}

impl TradeRecord {
    pub fn gross_pnl(&self) -> Decimal {
        self.qty1 * (self.exit_price1 - self.entry_price1)
            + self.qty2 * (self.exit_price2 - self.entry_price2)
    }

    pub fn net_pnl(&self) -> Decimal {
        self.gross_pnl() - self.commission
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl() > Decimal::ZERO
    }

    /// Reprices `spread_return` from the recorded entry and exit prices.
    fn reprice_spread_return(&mut self) {
        let prices = (
            self.entry_price1.to_f64(),
            self.entry_price2.to_f64(),
            self.exit_price1.to_f64(),
            self.exit_price2.to_f64(),
        );
        if let (Some(e1), Some(e2), Some(x1), Some(x2)) = prices {
            if e1 > 0.0 && e2 > 0.0 && x1 > 0.0 && x2 > 0.0 {
                self.spread_return =
                    spread_return_between(self.direction, self.hedge_ratio, (e1, e2), (x1, x2));
            }
        }
    }
}

pub struct PairTradeStrategy {
    params: StrategyParams,
    pairs: HashMap<PairId, PairRuntime>,
    order: Vec<PairId>,
    drawdown: DrawdownTracker,
    trades: Vec<TradeRecord>,
    bars_seen: u64,
}

impl PairTradeStrategy {
    pub fn new(params: StrategyParams, universe: &[PairId]) -> Self {
        let mut order: Vec<PairId> = universe.to_vec();
        order.sort();
        order.dedup();
        let pairs = order
            .iter()
            .map(|pair| (pair.clone(), PairRuntime::new(params.stats.clone())))
            .collect();
        let drawdown = DrawdownTracker::new(params.max_drawdown, params.drawdown_release_ratio);
        Self {
            params,
            pairs,
            order,
            drawdown,
            trades: Vec::new(),
            bars_seen: 0,
        }
    }

    pub fn from_config(cfg: &PairTradeConfig, universe: &[PairId]) -> Self {
        Self::new(StrategyParams::from(cfg), universe)
    }

    pub fn pairs(&self) -> &[PairId] {
        &self.order
    }

    pub fn runtime(&self, pair: &PairId) -> Option<&PairRuntime> {
        self.pairs.get(pair)
    }

    pub fn phase(&self, pair: &PairId) -> PairPhase {
        self.pairs
            .get(pair)
            .map(|rt| rt.phase())
            .unwrap_or(PairPhase::Flat)
    }

    pub fn open_positions(&self) -> usize {
        self.pairs.values().filter(|rt| rt.position.is_some()).count()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn drawdown(&self) -> &DrawdownTracker {
        &self.drawdown
    }

    fn close_position(
        &mut self,
        pair: &PairId,
        reason: ExitReason,
        bar: &BarSlice,
        price1: f64,
        price2: f64,
    ) -> Option<TradeIntent> {
        let runtime = self.pairs.get_mut(pair)?;
        let position = runtime.position.take()?;
        let ret = spread_return(&position, price1, price2);
        log::info!(
            "[EXIT] pair={} direction={} reason={} holding_days={} spread_return={:.5}",
            pair,
            position.direction.label(),
            reason.as_str(),
            position.holding_days,
            ret
        );
        self.trades.push(TradeRecord {
            pair: pair.clone(),
            direction: position.direction,
            reason,
            entry_ts: position.entry_ts,
            exit_ts: bar.ts,
            entry_price1: Decimal::from_f64(position.entry_price1).unwrap_or(Decimal::ZERO),
            entry_price2: Decimal::from_f64(position.entry_price2).unwrap_or(Decimal::ZERO),
            exit_price1: Decimal::from_f64(price1).unwrap_or(Decimal::ZERO),
            exit_price2: Decimal::from_f64(price2).unwrap_or(Decimal::ZERO),
            hedge_ratio: position.entry_hedge_ratio,
            qty1: position.qty1,
            qty2: position.qty2,
            holding_days: position.holding_days,
            spread_return: ret,
            commission: position.commission,
        });
        Some(TradeIntent::Close {
            pair: pair.clone(),
            reason,
            legs: [
                LegOrder::from_signed(pair, &pair.base, -position.qty1, false),
                LegOrder::from_signed(pair, &pair.quote, -position.qty2, false),
            ],
        })
    }

    fn try_open(
        &mut self,
        pair: &PairId,
        direction: PositionDirection,
        bar: &BarSlice,
        portfolio: &PortfolioView,
        entries_locked: bool,
    ) -> Option<TradeIntent> {
        let open_positions = self.open_positions();
        let runtime = self.pairs.get_mut(pair)?;
        let snapshot = *runtime.stats.last_snapshot()?;
        let (price1, price2) = (snapshot.price1, snapshot.price2);

        if price1 <= 0.0 || price2 <= 0.0 {
            log::warn!(
                "[ENTRY] pair={} non-positive price ({}, {}); skipping entry",
                pair,
                price1,
                price2
            );
            return None;
        }
        if entries_locked {
            log::debug!("[RISK] pair={} entry suppressed by drawdown lock", pair);
            return None;
        }
        if open_positions >= self.params.max_positions {
            log::debug!(
                "[ENTRY] pair={} position limit reached ({}/{})",
                pair,
                open_positions,
                self.params.max_positions
            );
            return None;
        }
        match runtime.stats.eligibility() {
            Ok(e) if e.eligible => {}
            Ok(e) => {
                log::debug!(
                    "[ENTRY] pair={} not eligible: {} (half_life={:?} p={:?})",
                    pair,
                    e.reason.unwrap_or("unknown"),
                    e.half_life,
                    e.coint_p_value
                );
                return None;
            }
            Err(err) => {
                log::warn!("[STATS] pair={} eligibility fit failed: {}", pair, err);
                return None;
            }
        }

        let hedge_ratio = snapshot.hedge_ratio?;
        let entry_spread = snapshot.spread?;
        let recent_vol = runtime
            .stats
            .recent_spread_vol(self.params.signal.vol_window);
        let Some(sizing) = size_entry(
            portfolio.value,
            hedge_ratio,
            price1,
            price2,
            recent_vol,
            direction,
            &self.params.signal,
        ) else {
            log::warn!("[ENTRY] pair={} could not size entry", pair);
            return None;
        };
        if sizing.qty1.is_zero() || sizing.qty2.is_zero() {
            log::warn!("[ENTRY] pair={} sized to zero; skipping", pair);
            return None;
        }

        log::info!(
            "[ENTRY] pair={} direction={} z={:.3} hedge={:.4} notional={:.2} qty1={} qty2={}",
            pair,
            direction.label(),
            snapshot.zscore.unwrap_or(0.0),
            sizing.hedge_ratio,
            sizing.notional,
            sizing.qty1,
            sizing.qty2
        );
        runtime.position = Some(PairPositionState {
            direction,
            entry_ts: bar.ts,
            entry_spread,
            entry_price1: price1,
            entry_price2: price2,
            entry_hedge_ratio: sizing.hedge_ratio,
            qty1: sizing.qty1,
            qty2: sizing.qty2,
            holding_days: 0,
            commission: Decimal::ZERO,
        });
        Some(TradeIntent::Open {
            pair: pair.clone(),
            direction,
            legs: [
                LegOrder::from_signed(pair, &pair.base, sizing.qty1, true),
                LegOrder::from_signed(pair, &pair.quote, sizing.qty2, true),
            ],
        })
    }
}

impl StrategyContext for PairTradeStrategy {
    fn on_bar(&mut self, bar: &BarSlice, portfolio: &PortfolioView) -> Vec<TradeIntent> {
        self.bars_seen += 1;
        let entries_locked = self.drawdown.update(portfolio.value);
        let mut intents = Vec::new();

        let order = self.order.clone();
        for pair in order.iter() {
            let (Some(price1), Some(price2)) = (bar.price(&pair.base), bar.price(&pair.quote))
            else {
                log::debug!("[EVAL] pair={} missing price at ts={}", pair, bar.ts);
                continue;
            };
            let Some(runtime) = self.pairs.get_mut(pair) else {
                continue;
            };
            let snapshot = match runtime.stats.update(bar.ts, price1, price2) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    runtime.stats_errors += 1;
                    if runtime.stats_errors % STATS_ERROR_LOG_EVERY == 1 {
                        log::warn!(
                            "[STATS] pair={} skipped bar ts={} ({} so far): {}",
                            pair,
                            bar.ts,
                            runtime.stats_errors,
                            err
                        );
                    } else {
                        log::debug!("[STATS] pair={} skipped bar ts={}: {}", pair, bar.ts, err);
                    }
                    continue;
                }
            };
            if !snapshot.ready {
                continue;
            }
            let Some(z) = snapshot.zscore else {
                continue;
            };
            runtime.last_z = Some(z);

            if let Some(position) = runtime.position.as_mut() {
                position.holding_days += 1;
                log::debug!(
                    "[EXIT_CHECK] pair={} z={:.3} spread={:?} entry_spread={:.4} holding_days={}",
                    pair,
                    z,
                    snapshot.spread,
                    position.entry_spread,
                    position.holding_days
                );
                if let Some(reason) = check_exit(position, &snapshot, &self.params.signal) {
                    if let Some(intent) = self.close_position(pair, reason, bar, price1, price2) {
                        intents.push(intent);
                    }
                }
                continue;
            }

            if let Some(direction) = entry_direction(z, &self.params.signal) {
                if let Some(intent) = self.try_open(pair, direction, bar, portfolio, entries_locked)
                {
                    intents.push(intent);
                }
            }
        }
        intents
    }

    fn on_order_filled(&mut self, fill: &OrderFill) {
        let is_leg1 = fill.symbol == fill.pair.base;
        if fill.opening {
            let Some(position) = self
                .pairs
                .get_mut(&fill.pair)
                .and_then(|rt| rt.position.as_mut())
            else {
                log::warn!("[FILL] entry fill for {} without open position", fill.pair);
                return;
            };
            let price = fill.price.to_f64().unwrap_or(0.0);
            if price > 0.0 {
                if is_leg1 {
                    position.entry_price1 = price;
                } else {
                    position.entry_price2 = price;
                }
            }
            position.commission += fill.commission;
            return;
        }

        let Some(record) = self.trades.iter_mut().rev().find(|t| t.pair == fill.pair) else {
            log::warn!("[FILL] exit fill for {} without trade record", fill.pair);
            return;
        };
        if is_leg1 {
            record.exit_price1 = fill.price;
        } else {
            record.exit_price2 = fill.price;
        }
        record.commission += fill.commission;
        // settles once the second exit leg has filled
        record.reprice_spread_return();
    }

    fn on_timer(&mut self, now: DateTime<Utc>) {
        log::info!(
            "[TIMER] {} bars={} open_positions={} trades={} drawdown={:.2}% locked={}",
            now.format("%Y-%m-%d"),
            self.bars_seen,
            self.open_positions(),
            self.trades.len(),
            self.drawdown.current_drawdown() * 100.0,
            self.drawdown.is_locked()
        );
        for pair in self.order.iter() {
            if let Some(rt) = self.pairs.get(pair) {
                log::debug!(
                    "[TIMER] pair={} phase={:?} holding_days={} last_z={:?}",
                    pair,
                    rt.phase(),
                    rt.position.as_ref().map(|p| p.holding_days).unwrap_or(0),
                    rt.last_z
                );
            }
        }
    }
}
