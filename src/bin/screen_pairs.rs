//! Ranks the configured universe by cointegration strength over the leading
//! window of the data source and prints one JSON line per pair.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use pairlab::config::PairTradeConfig;
use pairlab::engine::load_feed;
use pairlab::logging::init_logger;
use pairlab::pair_stats::PricePoint;
use pairlab::screening::{rank_pairs, screen_universe, ScreeningParams};

#[tokio::main]
async fn main() -> Result<()> {
    init_logger("info");

    let cfg = PairTradeConfig::from_env_or_yaml().context("invalid pairlab config")?;
    let feed = load_feed(&cfg)?;
    let params = ScreeningParams::from(&cfg);
    let window = if params.window == 0 {
        feed.len()
    } else {
        params.window.min(feed.len())
    };

    let histories: HashMap<String, Vec<PricePoint>> = feed
        .symbols()
        .into_iter()
        .map(|sym| {
            let points = feed.leading_points(&sym, window);
            (sym, points)
        })
        .collect();
    log::info!(
        "[SCREEN] {} symbols, {} candidate pairs, window {} bars",
        histories.len(),
        cfg.universe.len(),
        window
    );

    let results = screen_universe(
        Arc::new(histories),
        &cfg.universe,
        &params,
        cfg.screening_workers,
    )
    .await;
    let ranked = rank_pairs(&results, 0);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in ranked.iter() {
        writeln!(out, "{}", serde_json::to_string(result)?)?;
    }
    let eligible = ranked.iter().filter(|r| r.eligible).count();
    log::info!("[SCREEN] {} of {} pairs eligible", eligible, ranked.len());
    Ok(())
}
