use anyhow::{Context, Result};
use pairlab::config::PairTradeConfig;
use pairlab::engine::BacktestEngine;
use pairlab::logging::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger("info");

    let git_hash = option_env!("PAIRLAB_GIT_HASH").unwrap_or("unknown");
    log::info!("pairlab git: {}", git_hash);
    log::info!("Starting pair-trade backtest...");

    let cfg = PairTradeConfig::from_env_or_yaml().context("invalid pairlab config")?;
    let mut engine = BacktestEngine::new(cfg)
        .await
        .context("failed to initialize backtest engine")?;
    engine.run().await?;
    Ok(())
}
