use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use rust_decimal::Error as DecimalParseError;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs::File;
use std::num::{ParseFloatError, ParseIntError};
use std::path::Path;
use std::str::FromStr;

use crate::strategy::PairId;

const DEFAULT_LOOKBACK: usize = 60;
const DEFAULT_ENTRY_Z: f64 = 2.0;
const DEFAULT_EXIT_Z: f64 = 0.5;
const DEFAULT_MAX_HOLD_DAYS: u32 = 10;
const DEFAULT_POSITION_SIZE: f64 = 0.15;
const DEFAULT_MAX_POSITIONS: usize = 3;
const DEFAULT_MIN_HALF_LIFE: f64 = 5.0;
const DEFAULT_MAX_HALF_LIFE: f64 = 30.0;
const DEFAULT_MAX_DRAWDOWN: f64 = 0.15;
const DEFAULT_DRAWDOWN_RELEASE_RATIO: f64 = 0.7;
const DEFAULT_MIN_STAT_POINTS: usize = 20;
const DEFAULT_HALF_LIFE_FALLBACK: f64 = 100.0;
const DEFAULT_COINT_P_THRESHOLD: f64 = 0.05;
const DEFAULT_KALMAN_Q: f64 = 0.01;
const DEFAULT_KALMAN_R: f64 = 0.1;
const DEFAULT_KALMAN_INITIAL_BETA: f64 = 0.0;
const DEFAULT_KALMAN_INITIAL_VARIANCE: f64 = 1.0;
const DEFAULT_STOP_LOSS_STD_MULT: f64 = 3.0;
const DEFAULT_VOL_WINDOW: usize = 20;
const DEFAULT_TARGET_SPREAD_VOL: f64 = 0.01;
const DEFAULT_HEDGE_RATIO_CLAMP: f64 = 5.0;
const DEFAULT_INITIAL_CASH: Decimal = dec!(100000);
const DEFAULT_COMMISSION_BPS: Decimal = dec!(5);
const DEFAULT_SLIPPAGE_BPS: Decimal = dec!(2);
const DEFAULT_BARS_PER_YEAR: f64 = 252.0;
const DEFAULT_SYNTHETIC_SEED: u64 = 42;
const DEFAULT_SCREENING_WORKERS: usize = 4;
const DEFAULT_MAX_ACTIVE_PAIRS: usize = 3;
const DEFAULT_UNIVERSE: &str = "AAA/BBB";

#[derive(Debug)]
pub enum ConfigError {
    ParseIntError(ParseIntError),
    ParseFloatError(ParseFloatError),
    DecimalParseError(DecimalParseError),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ParseIntError(e) => write!(f, "Parse int error: {}", e),
            ConfigError::ParseFloatError(e) => write!(f, "Parse float error: {}", e),
            ConfigError::DecimalParseError(e) => write!(f, "Decimal parse error: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ParseIntError> for ConfigError {
    fn from(err: ParseIntError) -> ConfigError {
        ConfigError::ParseIntError(err)
    }
}

impl From<ParseFloatError> for ConfigError {
    fn from(err: ParseFloatError) -> ConfigError {
        ConfigError::ParseFloatError(err)
    }
}

impl From<DecimalParseError> for ConfigError {
    fn from(err: DecimalParseError) -> ConfigError {
        ConfigError::DecimalParseError(err)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::String(value) => value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            StringOrVec::Vec(values) => values
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct PairTradeYaml {
    lookback: Option<usize>,
    entry_z: Option<f64>,
    exit_z: Option<f64>,
    max_hold_days: Option<u32>,
    position_size: Option<f64>,
    max_positions: Option<usize>,
    use_kalman: Option<bool>,
    use_adaptive: Option<bool>,
    use_half_life: Option<bool>,
    min_half_life: Option<f64>,
    max_half_life: Option<f64>,
    max_drawdown: Option<f64>,
    drawdown_release_ratio: Option<f64>,
    min_stat_points: Option<usize>,
    half_life_fallback: Option<f64>,
    coint_p_threshold: Option<f64>,
    adf_max_lag: Option<usize>,
    kalman_q: Option<f64>,
    kalman_r: Option<f64>,
    kalman_initial_beta: Option<f64>,
    kalman_initial_variance: Option<f64>,
    kalman_price_scaled: Option<bool>,
    stop_loss_std_mult: Option<f64>,
    use_vol_sizing: Option<bool>,
    vol_window: Option<usize>,
    target_spread_vol: Option<f64>,
    hedge_ratio_clamp: Option<f64>,
    initial_cash: Option<Decimal>,
    commission_bps: Option<Decimal>,
    slippage_bps: Option<Decimal>,
    bars_per_year: Option<f64>,
    universe_pairs: Option<StringOrVec>,
    universe_symbols: Option<StringOrVec>,
    backtest_file: Option<String>,
    synthetic_bars: Option<usize>,
    synthetic_seed: Option<u64>,
    screen_on_startup: Option<bool>,
    screen_window_bars: Option<usize>,
    screening_workers: Option<usize>,
    max_active_pairs: Option<usize>,
    summary_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PairTradeConfig {
    pub lookback: usize,
    pub entry_z: f64,
    pub exit_z: f64,
    pub max_hold_days: u32,
    pub position_size: f64,
    pub max_positions: usize,
    pub use_kalman: bool,
    pub use_half_life: bool,
    pub min_half_life: f64,
    pub max_half_life: f64,
    pub max_drawdown: f64,
    pub drawdown_release_ratio: f64,
    pub min_stat_points: usize,
    pub half_life_fallback: f64,
    pub coint_p_threshold: f64,
    /// `None` picks the lag by the Schwert rule.
    pub adf_max_lag: Option<usize>,
    pub kalman_q: f64,
    pub kalman_r: f64,
    pub kalman_initial_beta: f64,
    pub kalman_initial_variance: f64,
    pub kalman_price_scaled: bool,
    pub stop_loss_std_mult: f64,
    pub use_vol_sizing: bool,
    pub vol_window: usize,
    pub target_spread_vol: f64,
    pub hedge_ratio_clamp: f64,
    pub initial_cash: Decimal,
    pub commission_bps: Decimal,
    pub slippage_bps: Decimal,
    pub bars_per_year: f64,
    pub universe: Vec<PairId>,
    // Data source: a JSONL dump, or a generated pair when no file is given
    pub backtest_file: Option<String>,
    pub synthetic_bars: Option<usize>,
    pub synthetic_seed: u64,
    pub screen_on_startup: bool,
    pub screen_window_bars: Option<usize>,
    pub screening_workers: usize,
    pub max_active_pairs: usize,
    pub summary_file: Option<String>,
}

impl Default for PairTradeConfig {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
            entry_z: DEFAULT_ENTRY_Z,
            exit_z: DEFAULT_EXIT_Z,
            max_hold_days: DEFAULT_MAX_HOLD_DAYS,
            position_size: DEFAULT_POSITION_SIZE,
            max_positions: DEFAULT_MAX_POSITIONS,
            use_kalman: true,
            use_half_life: true,
            min_half_life: DEFAULT_MIN_HALF_LIFE,
            max_half_life: DEFAULT_MAX_HALF_LIFE,
            max_drawdown: DEFAULT_MAX_DRAWDOWN,
            drawdown_release_ratio: DEFAULT_DRAWDOWN_RELEASE_RATIO,
            min_stat_points: DEFAULT_MIN_STAT_POINTS,
            half_life_fallback: DEFAULT_HALF_LIFE_FALLBACK,
            coint_p_threshold: DEFAULT_COINT_P_THRESHOLD,
            adf_max_lag: None,
            kalman_q: DEFAULT_KALMAN_Q,
            kalman_r: DEFAULT_KALMAN_R,
            kalman_initial_beta: DEFAULT_KALMAN_INITIAL_BETA,
            kalman_initial_variance: DEFAULT_KALMAN_INITIAL_VARIANCE,
            kalman_price_scaled: false,
            stop_loss_std_mult: DEFAULT_STOP_LOSS_STD_MULT,
            use_vol_sizing: true,
            vol_window: DEFAULT_VOL_WINDOW,
            target_spread_vol: DEFAULT_TARGET_SPREAD_VOL,
            hedge_ratio_clamp: DEFAULT_HEDGE_RATIO_CLAMP,
            initial_cash: DEFAULT_INITIAL_CASH,
            commission_bps: DEFAULT_COMMISSION_BPS,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            bars_per_year: DEFAULT_BARS_PER_YEAR,
            universe: vec![PairId::new("AAA", "BBB")],
            backtest_file: None,
            synthetic_bars: None,
            synthetic_seed: DEFAULT_SYNTHETIC_SEED,
            screen_on_startup: false,
            screen_window_bars: None,
            screening_workers: DEFAULT_SCREENING_WORKERS,
            max_active_pairs: DEFAULT_MAX_ACTIVE_PAIRS,
            summary_file: None,
        }
    }
}

impl PairTradeConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRLAB_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open pairlab config {}", path_ref.display()))?;
        let yaml: PairTradeYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse pairlab config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: PairTradeYaml) -> Result<Self> {
        let d = Self::default();
        let universe = resolve_universe_from_yaml(&yaml)?;
        Ok(PairTradeConfig {
            lookback: yaml.lookback.unwrap_or(d.lookback),
            entry_z: yaml.entry_z.unwrap_or(d.entry_z),
            exit_z: yaml.exit_z.unwrap_or(d.exit_z),
            max_hold_days: yaml.max_hold_days.unwrap_or(d.max_hold_days),
            position_size: yaml.position_size.unwrap_or(d.position_size),
            max_positions: yaml.max_positions.unwrap_or(d.max_positions),
            use_kalman: yaml.use_kalman.or(yaml.use_adaptive).unwrap_or(d.use_kalman),
            use_half_life: yaml.use_half_life.unwrap_or(d.use_half_life),
            min_half_life: yaml.min_half_life.unwrap_or(d.min_half_life),
            max_half_life: yaml.max_half_life.unwrap_or(d.max_half_life),
            max_drawdown: yaml.max_drawdown.unwrap_or(d.max_drawdown),
            drawdown_release_ratio: yaml
                .drawdown_release_ratio
                .unwrap_or(d.drawdown_release_ratio),
            min_stat_points: yaml.min_stat_points.unwrap_or(d.min_stat_points),
            half_life_fallback: yaml.half_life_fallback.unwrap_or(d.half_life_fallback),
            coint_p_threshold: yaml.coint_p_threshold.unwrap_or(d.coint_p_threshold),
            adf_max_lag: yaml.adf_max_lag,
            kalman_q: yaml.kalman_q.unwrap_or(d.kalman_q),
            kalman_r: yaml.kalman_r.unwrap_or(d.kalman_r),
            kalman_initial_beta: yaml.kalman_initial_beta.unwrap_or(d.kalman_initial_beta),
            kalman_initial_variance: yaml
                .kalman_initial_variance
                .unwrap_or(d.kalman_initial_variance),
            kalman_price_scaled: yaml.kalman_price_scaled.unwrap_or(d.kalman_price_scaled),
            stop_loss_std_mult: yaml.stop_loss_std_mult.unwrap_or(d.stop_loss_std_mult),
            use_vol_sizing: yaml.use_vol_sizing.unwrap_or(d.use_vol_sizing),
            vol_window: yaml.vol_window.unwrap_or(d.vol_window),
            target_spread_vol: yaml.target_spread_vol.unwrap_or(d.target_spread_vol),
            hedge_ratio_clamp: yaml.hedge_ratio_clamp.unwrap_or(d.hedge_ratio_clamp),
            initial_cash: yaml.initial_cash.unwrap_or(d.initial_cash),
            commission_bps: yaml.commission_bps.unwrap_or(d.commission_bps),
            slippage_bps: yaml.slippage_bps.unwrap_or(d.slippage_bps),
            bars_per_year: yaml.bars_per_year.unwrap_or(d.bars_per_year),
            universe,
            backtest_file: yaml.backtest_file.filter(|v| !v.trim().is_empty()),
            synthetic_bars: yaml.synthetic_bars,
            synthetic_seed: yaml.synthetic_seed.unwrap_or(d.synthetic_seed),
            screen_on_startup: yaml.screen_on_startup.unwrap_or(d.screen_on_startup),
            screen_window_bars: yaml.screen_window_bars,
            screening_workers: yaml.screening_workers.unwrap_or(d.screening_workers),
            max_active_pairs: yaml.max_active_pairs.unwrap_or(d.max_active_pairs),
            summary_file: yaml.summary_file.filter(|v| !v.trim().is_empty()),
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_from_env("LOOKBACK", &mut self.lookback)?;
        override_from_env("ENTRY_Z", &mut self.entry_z)?;
        override_from_env("EXIT_Z", &mut self.exit_z)?;
        override_from_env("MAX_HOLD_DAYS", &mut self.max_hold_days)?;
        override_from_env("POSITION_SIZE", &mut self.position_size)?;
        override_from_env("MAX_POSITIONS", &mut self.max_positions)?;
        override_flag_from_env("USE_ADAPTIVE", &mut self.use_kalman)?;
        override_flag_from_env("USE_KALMAN", &mut self.use_kalman)?;
        override_flag_from_env("USE_HALF_LIFE", &mut self.use_half_life)?;
        override_from_env("MIN_HALF_LIFE", &mut self.min_half_life)?;
        override_from_env("MAX_HALF_LIFE", &mut self.max_half_life)?;
        override_from_env("MAX_DRAWDOWN", &mut self.max_drawdown)?;
        override_from_env("DRAWDOWN_RELEASE_RATIO", &mut self.drawdown_release_ratio)?;
        override_from_env("MIN_STAT_POINTS", &mut self.min_stat_points)?;
        override_from_env("HALF_LIFE_FALLBACK", &mut self.half_life_fallback)?;
        override_from_env("COINT_P_THRESHOLD", &mut self.coint_p_threshold)?;
        if let Some(value) = env_value("ADF_MAX_LAG") {
            self.adf_max_lag = Some(value.parse()?);
        }
        override_from_env("KALMAN_Q", &mut self.kalman_q)?;
        override_from_env("KALMAN_R", &mut self.kalman_r)?;
        override_from_env("KALMAN_INITIAL_BETA", &mut self.kalman_initial_beta)?;
        override_from_env("KALMAN_INITIAL_VARIANCE", &mut self.kalman_initial_variance)?;
        override_flag_from_env("KALMAN_PRICE_SCALED", &mut self.kalman_price_scaled)?;
        override_from_env("STOP_LOSS_STD_MULT", &mut self.stop_loss_std_mult)?;
        override_flag_from_env("USE_VOL_SIZING", &mut self.use_vol_sizing)?;
        override_from_env("VOL_WINDOW", &mut self.vol_window)?;
        override_from_env("TARGET_SPREAD_VOL", &mut self.target_spread_vol)?;
        override_from_env("HEDGE_RATIO_CLAMP", &mut self.hedge_ratio_clamp)?;
        override_from_env("INITIAL_CASH", &mut self.initial_cash)?;
        override_from_env("COMMISSION_BPS", &mut self.commission_bps)?;
        override_from_env("SLIPPAGE_BPS", &mut self.slippage_bps)?;
        override_from_env("BARS_PER_YEAR", &mut self.bars_per_year)?;

        if env_has_universe_override() {
            self.universe = parse_universe_from_env()?;
        }

        if let Some(value) = env_value("BACKTEST_FILE") {
            self.backtest_file = Some(value);
        }
        if let Some(value) = env_value("SYNTHETIC_BARS") {
            self.synthetic_bars = Some(value.parse()?);
        }
        override_from_env("SYNTHETIC_SEED", &mut self.synthetic_seed)?;
        override_flag_from_env("SCREEN_ON_STARTUP", &mut self.screen_on_startup)?;
        if let Some(value) = env_value("SCREEN_WINDOW_BARS") {
            self.screen_window_bars = Some(value.parse()?);
        }
        override_from_env("SCREENING_WORKERS", &mut self.screening_workers)?;
        override_from_env("MAX_ACTIVE_PAIRS", &mut self.max_active_pairs)?;
        if let Some(value) = env_value("SUMMARY_FILE") {
            self.summary_file = Some(value);
        }
        Ok(())
    }

    /// Trailing bars used by the cointegration screen.
    pub fn screen_window(&self) -> usize {
        self.screen_window_bars.unwrap_or(self.lookback * 2)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: impl Into<String>) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(msg.into()))
            }
        }

        check(
            self.min_stat_points >= 3,
            format!("min_stat_points must be >= 3 (got {})", self.min_stat_points),
        )?;
        check(
            self.lookback >= self.min_stat_points,
            format!(
                "lookback ({}) must be >= min_stat_points ({})",
                self.lookback, self.min_stat_points
            ),
        )?;
        check(
            self.exit_z >= 0.0 && self.entry_z > self.exit_z,
            format!(
                "entry_z ({}) must exceed exit_z ({}) and exit_z must be >= 0",
                self.entry_z, self.exit_z
            ),
        )?;
        check(
            self.position_size > 0.0 && self.position_size <= 1.0,
            format!("position_size must be in (0, 1] (got {})", self.position_size),
        )?;
        check(
            self.max_drawdown > 0.0 && self.max_drawdown < 1.0,
            format!("max_drawdown must be in (0, 1) (got {})", self.max_drawdown),
        )?;
        check(
            self.drawdown_release_ratio > 0.0 && self.drawdown_release_ratio <= 1.0,
            format!(
                "drawdown_release_ratio must be in (0, 1] (got {})",
                self.drawdown_release_ratio
            ),
        )?;
        check(
            self.min_half_life <= self.max_half_life,
            format!(
                "min_half_life ({}) must be <= max_half_life ({})",
                self.min_half_life, self.max_half_life
            ),
        )?;
        check(
            self.kalman_q >= 0.0 && self.kalman_r >= 0.0,
            "kalman_q and kalman_r must be >= 0",
        )?;
        check(
            self.kalman_initial_variance + self.kalman_r > 0.0,
            "kalman_initial_variance + kalman_r must be > 0",
        )?;
        check(self.max_positions >= 1, "max_positions must be >= 1")?;
        check(self.max_hold_days >= 1, "max_hold_days must be >= 1")?;
        check(
            self.stop_loss_std_mult > 0.0,
            "stop_loss_std_mult must be > 0",
        )?;
        check(self.bars_per_year > 0.0, "bars_per_year must be > 0")?;
        check(
            self.initial_cash > Decimal::ZERO,
            "initial_cash must be positive",
        )?;
        check(
            self.commission_bps >= Decimal::ZERO && self.slippage_bps >= Decimal::ZERO,
            "commission_bps and slippage_bps must be >= 0",
        )?;
        check(!self.universe.is_empty(), "universe is empty")?;
        check(
            self.universe.iter().all(|p| p.base != p.quote),
            "universe pairs need two distinct symbols",
        )?;
        check(
            self.backtest_file.is_some() || self.synthetic_bars.is_some(),
            "either backtest_file or synthetic_bars must be set",
        )?;
        Ok(())
    }

    pub fn log_summary(&self) {
        log::info!(
            "[CONFIG] universe={} lookback={} entry_z={} exit_z={} max_hold_days={} stop_loss_std_mult={}",
            self.universe
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
            self.lookback,
            self.entry_z,
            self.exit_z,
            self.max_hold_days,
            self.stop_loss_std_mult
        );
        log::info!(
            "[CONFIG] hedge={} half_life_gate={} [{}, {}] coint_p<={} max_positions={} max_drawdown={} release_ratio={}",
            if self.use_kalman { "kalman" } else { "ols" },
            self.use_half_life,
            self.min_half_life,
            self.max_half_life,
            self.coint_p_threshold,
            self.max_positions,
            self.max_drawdown,
            self.drawdown_release_ratio
        );
        log::info!(
            "[CONFIG] initial_cash={} commission_bps={} slippage_bps={} source={}",
            self.initial_cash,
            self.commission_bps,
            self.slippage_bps,
            match (&self.backtest_file, self.synthetic_bars) {
                (Some(file), _) => file.clone(),
                (None, Some(bars)) => format!("synthetic({} bars, seed {})", bars, self.synthetic_seed),
                (None, None) => "none".to_string(),
            }
        );
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn override_from_env<T>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    ConfigError: From<T::Err>,
{
    if let Some(value) = env_value(key) {
        *slot = value.parse()?;
    }
    Ok(())
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{} must be a boolean (got {})",
            key, other
        ))),
    }
}

fn override_flag_from_env(key: &str, slot: &mut bool) -> Result<(), ConfigError> {
    if let Some(value) = env_value(key) {
        *slot = parse_flag(key, &value)?;
    }
    Ok(())
}

fn env_has_universe_override() -> bool {
    env_value("UNIVERSE_PAIRS").is_some() || env_value("UNIVERSE_SYMBOLS").is_some()
}

fn parse_universe_from_env() -> Result<Vec<PairId>, ConfigError> {
    if let Some(raw_pairs) = env_value("UNIVERSE_PAIRS") {
        return parse_pairs_list(&raw_pairs);
    }
    if let Some(raw_symbols) = env_value("UNIVERSE_SYMBOLS") {
        let symbols: Vec<String> = raw_symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return parse_symbols_vec(&symbols);
    }
    parse_pairs_list(DEFAULT_UNIVERSE)
}

fn resolve_universe_from_yaml(yaml: &PairTradeYaml) -> Result<Vec<PairId>> {
    if let Some(pairs) = yaml.universe_pairs.clone() {
        let pairs = pairs.into_vec();
        if pairs.is_empty() {
            return Err(anyhow!("universe_pairs produced no valid pairs"));
        }
        return Ok(parse_pairs_list(&pairs.join(","))?);
    }
    if let Some(symbols) = yaml.universe_symbols.clone() {
        return Ok(parse_symbols_vec(&symbols.into_vec())?);
    }
    Ok(parse_pairs_list(DEFAULT_UNIVERSE)?)
}

/// Every combination of `symbols`, each pair ordered alphabetically.
pub fn parse_symbols_vec(symbols: &[String]) -> Result<Vec<PairId>, ConfigError> {
    let mut syms: Vec<&str> = symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    syms.sort_unstable();
    syms.dedup();
    let mut pairs = Vec::new();
    for i in 0..syms.len() {
        for j in (i + 1)..syms.len() {
            pairs.push(PairId::new(syms[i], syms[j]));
        }
    }
    if pairs.is_empty() {
        return Err(ConfigError::Invalid(
            "universe_symbols produced no valid pairs".to_string(),
        ));
    }
    Ok(pairs)
}

/// Parses `"A/B,C/D"`.
pub fn parse_pairs_list(raw: &str) -> Result<Vec<PairId>, ConfigError> {
    let mut pairs = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let pair: PairId = trimmed.parse().map_err(ConfigError::Invalid)?;
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    if pairs.is_empty() {
        return Err(ConfigError::Invalid(
            "universe_pairs produced no valid pairs".to_string(),
        ));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn valid() -> PairTradeConfig {
        PairTradeConfig {
            synthetic_bars: Some(100),
            ..PairTradeConfig::default()
        }
    }

    #[test]
    fn loads_yaml_with_defaults_for_missing_keys() {
        let file = yaml_file(
            r#"
lookback: 40
entry_z: 2.5
use_adaptive: false
universe_symbols: [ETH, BTC, SOL]
initial_cash: "50000"
synthetic_bars: 300
"#,
        );
        let cfg = PairTradeConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.lookback, 40);
        assert_eq!(cfg.entry_z, 2.5);
        assert_eq!(cfg.exit_z, DEFAULT_EXIT_Z);
        assert!(!cfg.use_kalman);
        assert_eq!(cfg.initial_cash, dec!(50000));
        assert_eq!(cfg.screen_window(), 80);
        let names: Vec<String> = cfg.universe.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["BTC/ETH", "BTC/SOL", "ETH/SOL"]);
    }

    #[test]
    fn universe_pairs_accepts_string_or_list() {
        let file = yaml_file("universe_pairs: \"KO/PEP, XOM/CVX\"\nsynthetic_bars: 10\nlookback: 20\n");
        let cfg = PairTradeConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(
            cfg.universe,
            vec![PairId::new("KO", "PEP"), PairId::new("XOM", "CVX")]
        );

        let file = yaml_file("universe_pairs:\n  - KO/PEP\nsynthetic_bars: 10\nlookback: 20\n");
        let cfg = PairTradeConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.universe, vec![PairId::new("KO", "PEP")]);
    }

    #[test]
    fn rejects_entry_at_or_below_exit() {
        let cfg = PairTradeConfig {
            entry_z: 0.5,
            exit_z: 0.5,
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let file = yaml_file("entry_z: 0.4\nexit_z: 0.5\nsynthetic_bars: 10\n");
        let err = PairTradeConfig::from_yaml_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("entry_z"), "{}", err);
    }

    #[test]
    fn validation_catches_bad_ranges() {
        assert!(valid().validate().is_ok());
        let bad = [
            PairTradeConfig {
                lookback: 10,
                ..valid()
            },
            PairTradeConfig {
                position_size: 0.0,
                ..valid()
            },
            PairTradeConfig {
                max_drawdown: 1.0,
                ..valid()
            },
            PairTradeConfig {
                min_half_life: 40.0,
                ..valid()
            },
            PairTradeConfig {
                kalman_initial_variance: 0.0,
                kalman_r: 0.0,
                ..valid()
            },
            PairTradeConfig {
                synthetic_bars: None,
                ..valid()
            },
            PairTradeConfig {
                universe: Vec::new(),
                ..valid()
            },
        ];
        for cfg in bad.iter() {
            assert!(cfg.validate().is_err(), "{:?}", cfg);
        }
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let file = yaml_file("lookback: [not, a, number]\n");
        let err = PairTradeConfig::from_yaml_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse pairlab config"));
    }

    #[test]
    fn pair_list_parsing() {
        assert_eq!(
            parse_pairs_list("A/B, ,C/D,A/B").unwrap(),
            vec![PairId::new("A", "B"), PairId::new("C", "D")]
        );
        assert!(parse_pairs_list("AB").is_err());
        assert!(parse_pairs_list(" , ").is_err());
        assert!(parse_symbols_vec(&["ONLY".to_string()]).is_err());
        assert!(parse_flag("X", "maybe").is_err());
        assert!(parse_flag("X", "Yes").unwrap());
    }
}
