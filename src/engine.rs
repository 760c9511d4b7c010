//! Bar-by-bar driver: replays prices through the strategy, routes its intents
//! to an execution gateway and reports fills and timer ticks back.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use crate::config::PairTradeConfig;
use crate::metrics::PerformanceSummary;
use crate::pair_stats::PricePoint;
use crate::pnl_log::{PnlLogRecord, PnlLogger};
use crate::ports::replay_feed::{ReplayEntry, ReplayFeed};
use crate::screening::{rank_pairs, screen_universe, ScreeningParams};
use crate::strategy::{
    BarSlice, PairId, PairTradeStrategy, PortfolioView, StrategyContext, TradeRecord,
};
use crate::synthetic::{cointegrated_pair, SyntheticPairParams};
use crate::trade::execution::gateway::ExecutionGateway;
use crate::trade::execution::paper_broker::PaperBroker;
use crate::trade::intent::TradeIntent;

const PNL_SOURCE: &str = "backtest";

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    summary: &'a PerformanceSummary,
    universe: Vec<String>,
    rejected_orders: usize,
    trades: &'a [TradeRecord],
}

pub struct BacktestEngine {
    cfg: PairTradeConfig,
    feed: ReplayFeed,
    gateway: Arc<dyn ExecutionGateway>,
    strategy: PairTradeStrategy,
    last_prices: HashMap<String, Decimal>,
    equity_curve: Vec<(i64, f64)>,
    last_day: Option<NaiveDate>,
    rejected_orders: usize,
    pnl_logger: Option<PnlLogger>,
}

impl BacktestEngine {
    pub async fn new(cfg: PairTradeConfig) -> Result<Self> {
        let feed = load_feed(&cfg)?;
        let universe = if cfg.screen_on_startup {
            select_universe(&cfg, &feed).await
        } else {
            cfg.universe.clone()
        };
        let gateway: Arc<dyn ExecutionGateway> = Arc::new(PaperBroker::from_config(&cfg));
        let strategy = PairTradeStrategy::from_config(&cfg, &universe);
        let pnl_logger = PnlLogger::from_env("pairlab");
        Ok(Self {
            cfg,
            feed,
            gateway,
            strategy,
            last_prices: HashMap::new(),
            equity_curve: Vec::new(),
            last_day: None,
            rejected_orders: 0,
            pnl_logger,
        })
    }

    pub fn with_pnl_logger(mut self, logger: Option<PnlLogger>) -> Self {
        self.pnl_logger = logger;
        self
    }

    pub fn strategy(&self) -> &PairTradeStrategy {
        &self.strategy
    }

    pub fn feed(&self) -> &ReplayFeed {
        &self.feed
    }

    pub fn equity_curve(&self) -> &[(i64, f64)] {
        &self.equity_curve
    }

    pub fn rejected_orders(&self) -> usize {
        self.rejected_orders
    }

    pub fn last_prices(&self) -> &HashMap<String, Decimal> {
        &self.last_prices
    }

    pub async fn run(&mut self) -> Result<PerformanceSummary> {
        self.cfg.log_summary();
        log::info!(
            "[BACKTEST] replaying {} bars from index {} for {} pairs",
            self.feed.len(),
            self.feed.cursor(),
            self.strategy.pairs().len()
        );

        loop {
            let Some(entry) = self.feed.current().cloned() else {
                break;
            };
            if let Err(e) = self.step(&entry).await {
                log::error!("[BACKTEST] step at ts={} failed: {:?}", entry.timestamp, e);
            }
            if !self.feed.tick() {
                log::info!("[BACKTEST] End of data reached. Backtest finished.");
                break;
            }
        }

        let values: Vec<f64> = self.equity_curve.iter().map(|(_, v)| *v).collect();
        let summary =
            PerformanceSummary::from_run(&values, self.strategy.trades(), self.cfg.bars_per_year);
        summary.log();
        if self.strategy.open_positions() > 0 {
            log::warn!(
                "[SUMMARY] {} positions still open at end of data (marked to last close)",
                self.strategy.open_positions()
            );
        }
        if self.rejected_orders > 0 {
            log::warn!("[SUMMARY] {} orders rejected", self.rejected_orders);
        }
        if let Some(path) = self.cfg.summary_file.clone() {
            self.write_summary(&path, &summary)?;
        }
        Ok(summary)
    }

    async fn step(&mut self, entry: &ReplayEntry) -> Result<()> {
        let ts = entry.timestamp;
        for (symbol, snap) in entry.prices.iter() {
            self.last_prices.insert(symbol.clone(), snap.price);
        }

        let now = Utc
            .timestamp_millis_opt(ts)
            .single()
            .ok_or_else(|| anyhow!("timestamp {} out of range", ts))?;
        let today = now.date_naive();
        if self.last_day.is_some_and(|d| d != today) {
            self.strategy.on_timer(now);
        }
        self.last_day = Some(today);

        let before = self
            .gateway
            .portfolio(&self.last_prices)
            .await
            .context("failed to value portfolio before bar")?;
        let view = PortfolioView {
            value: before.value_f64(),
            cash: before.cash_f64(),
        };

        let intents = self.strategy.on_bar(&BarSlice::from(entry), &view);
        for intent in intents.iter() {
            self.execute(intent, entry).await;
        }

        let after = self
            .gateway
            .portfolio(&self.last_prices)
            .await
            .context("failed to value portfolio after bar")?;
        self.equity_curve.push((ts, after.value_f64()));
        Ok(())
    }

    async fn execute(&mut self, intent: &TradeIntent, entry: &ReplayEntry) {
        let mut filled = 0;
        for leg in intent.legs().iter() {
            let Some(price) = entry.price(&leg.symbol) else {
                log::error!(
                    "[ORDER] pair={} symbol={} has no price at ts={}",
                    leg.pair,
                    leg.symbol,
                    entry.timestamp
                );
                self.rejected_orders += 1;
                continue;
            };
            match self.gateway.submit(leg, price, entry.timestamp).await {
                Ok(fill) => {
                    self.strategy.on_order_filled(&fill);
                    filled += 1;
                }
                Err(err) => {
                    log::error!(
                        "[ORDER] pair={} symbol={} side={:?} qty={} rejected: {}",
                        leg.pair,
                        leg.symbol,
                        leg.side,
                        leg.qty,
                        err
                    );
                    self.rejected_orders += 1;
                }
            }
        }

        if let TradeIntent::Close { pair, .. } = intent {
            if filled == intent.legs().len() {
                self.journal_close(pair);
            }
        }
    }

    fn journal_close(&mut self, pair: &PairId) {
        let Some(trade) = self.strategy.trades().iter().rev().find(|t| &t.pair == pair) else {
            return;
        };
        log::info!(
            "[PNL] pair={} reason={} net_pnl={} commission={}",
            pair,
            trade.reason.as_str(),
            trade.net_pnl().round_dp(2),
            trade.commission.round_dp(4)
        );
        let record = PnlLogRecord::from_trade(trade, PNL_SOURCE);
        if let Some(logger) = &mut self.pnl_logger {
            if let Err(err) = logger.log(&record) {
                log::warn!("[PNL] failed to write pnl log: {:?}", err);
            }
        }
    }

    fn write_summary(&self, path: &str, summary: &PerformanceSummary) -> Result<()> {
        let report = RunReport {
            summary,
            universe: self.strategy.pairs().iter().map(|p| p.to_string()).collect(),
            rejected_orders: self.rejected_orders,
            trades: self.strategy.trades(),
        };
        let file =
            File::create(path).with_context(|| format!("failed to create summary file {}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .with_context(|| format!("failed to write summary file {}", path))?;
        log::info!("[SUMMARY] written to {}", path);
        Ok(())
    }
}

pub fn load_feed(cfg: &PairTradeConfig) -> Result<ReplayFeed> {
    if let Some(path) = cfg.backtest_file.as_deref() {
        log::info!("[BACKTEST] loading replay file {}", path);
        return ReplayFeed::new(path);
    }
    let bars = cfg
        .synthetic_bars
        .ok_or_else(|| anyhow!("no data source: set backtest_file or synthetic_bars"))?;
    let pair = cfg
        .universe
        .first()
        .ok_or_else(|| anyhow!("universe is empty"))?;
    if cfg.universe.len() > 1 {
        log::warn!(
            "[BACKTEST] synthetic data covers {} only; other pairs will see no prices",
            pair
        );
    }
    let params = SyntheticPairParams {
        base: pair.base.clone(),
        quote: pair.quote.clone(),
        bars,
        ..SyntheticPairParams::default()
    };
    let entries = cointegrated_pair(&params, cfg.synthetic_seed)
        .context("failed to generate synthetic pair")?;
    log::info!(
        "[BACKTEST] generated {} synthetic bars for {} (seed {})",
        bars,
        pair,
        cfg.synthetic_seed
    );
    ReplayFeed::from_entries(entries)
}

/// Screens the configured universe over the leading window and keeps the best
/// eligible pairs. Trading starts after that window.
async fn select_universe(cfg: &PairTradeConfig, feed: &ReplayFeed) -> Vec<PairId> {
    let window = cfg.screen_window().min(feed.len().saturating_sub(1));
    let symbols: BTreeSet<&String> = cfg
        .universe
        .iter()
        .flat_map(|p| [&p.base, &p.quote])
        .collect();
    let histories: HashMap<String, Vec<PricePoint>> = symbols
        .into_iter()
        .map(|sym| (sym.clone(), feed.leading_points(sym, window)))
        .filter(|(_, points)| !points.is_empty())
        .collect();

    let params = ScreeningParams {
        window,
        ..ScreeningParams::from(cfg)
    };
    let results = screen_universe(
        Arc::new(histories),
        &cfg.universe,
        &params,
        cfg.screening_workers,
    )
    .await;
    let selected: Vec<PairId> = rank_pairs(&results, cfg.max_active_pairs)
        .into_iter()
        .filter(|r| r.eligible)
        .map(|r| {
            log::info!(
                "[SCREEN] selected pair={} p={:.4} half_life={:.2} score={:.3}",
                r.pair,
                r.p_value,
                r.half_life,
                r.score
            );
            r.pair
        })
        .collect();

    if selected.is_empty() {
        log::warn!("[SCREEN] no eligible pairs; trading the configured universe");
        return cfg.universe.clone();
    }
    if !feed.seek(window) {
        log::warn!("[SCREEN] could not skip the formation window of {} bars", window);
    }
    selected
}

/// Value of every open position at `prices`, net of entry commission.
pub fn open_position_pnl(
    strategy: &PairTradeStrategy,
    prices: &HashMap<String, Decimal>,
) -> f64 {
    strategy
        .pairs()
        .iter()
        .filter_map(|pair| {
            let position = strategy.runtime(pair)?.position.as_ref()?;
            let p1 = prices.get(&pair.base)?.to_f64()?;
            let p2 = prices.get(&pair.quote)?.to_f64()?;
            let q1 = position.qty1.to_f64()?;
            let q2 = position.qty2.to_f64()?;
            let commission = position.commission.to_f64()?;
            Some(q1 * (p1 - position.entry_price1) + q2 * (p2 - position.entry_price2) - commission)
        })
        .sum()
}
