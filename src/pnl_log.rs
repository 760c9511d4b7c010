use chrono::{TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::strategy::TradeRecord;

/// One closed round trip, as written to the daily journal.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PnlLogRecord {
    pub ts: i64,
    pub pair: String,
    pub base: String,
    pub quote: String,
    pub direction: String,
    pub reason: String,
    pub holding_days: u32,
    pub spread_return: f64,
    pub pnl: f64,
    pub source: String,
}

impl PnlLogRecord {
    pub fn from_trade(trade: &TradeRecord, source: &str) -> Self {
        Self {
            ts: trade.exit_ts,
            pair: trade.pair.to_string(),
            base: trade.pair.base.clone(),
            quote: trade.pair.quote.clone(),
            direction: trade.direction.label().to_string(),
            reason: trade.reason.as_str().to_string(),
            holding_days: trade.holding_days,
            spread_return: trade.spread_return,
            pnl: trade.net_pnl().to_f64().unwrap_or(0.0),
            source: source.to_string(),
        }
    }
}

/// Appends closed trades to `pnl-<tag>-<YYYYMMDD>.jsonl` files.
///
/// Journals from earlier runs are kept unless a retention period is set, in
/// which case files not modified within it are pruned on the first write.
#[derive(Debug)]
pub struct PnlLogger {
    dir: PathBuf,
    tag: Option<String>,
    retain_days: Option<u64>,
    pruned: bool,
}

impl PnlLogger {
    pub fn new(dir: PathBuf, tag: Option<&str>) -> Self {
        Self {
            dir,
            tag: tag.map(sanitize_pnl_tag).filter(|v| !v.is_empty()),
            retain_days: None,
            pruned: false,
        }
    }

    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retain_days = Some(days.max(1));
        self
    }

    /// `None` when `PAIRLAB_PNL_LOG` disables the journal.
    pub fn from_env(default_tag: &str) -> Option<Self> {
        let enabled = env::var("PAIRLAB_PNL_LOG")
            .ok()
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                !(v == "0" || v == "false" || v == "no")
            })
            .unwrap_or(true);
        if !enabled {
            return None;
        }
        let dir = env::var("PAIRLAB_PNL_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join("pairlab_pnl"))
            })
            .unwrap_or_else(|| PathBuf::from("pairlab_pnl"));
        let tag = env::var("PAIRLAB_PNL_TAG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_tag.to_string());
        let logger = Self::new(dir, Some(&tag));
        let retain_days = env::var("PAIRLAB_PNL_RETAIN_DAYS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok());
        Some(match retain_days {
            Some(days) => logger.with_retention_days(days),
            None => logger,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log(&mut self, record: &PnlLogRecord) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.log_path(record.ts);
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        if !self.pruned {
            self.pruned = true;
            if let Some(days) = self.retain_days {
                self.prune_older_than(days, &path);
            }
        }
        Ok(path)
    }

    /// Journal file for the UTC day of `ts_ms`.
    pub fn log_path(&self, ts_ms: i64) -> PathBuf {
        let date = Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d")
            .to_string();
        let mut name = String::from("pnl");
        if let Some(tag) = &self.tag {
            name.push('-');
            name.push_str(tag);
        }
        name.push('-');
        name.push_str(&date);
        name.push_str(".jsonl");
        self.dir.join(name)
    }

    fn prune_older_than(&self, days: u64, current: &Path) {
        let Some(cutoff) =
            SystemTime::now().checked_sub(Duration::from_secs(days.saturating_mul(86_400)))
        else {
            return;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let stale = entries.flatten().map(|e| e.path()).filter(|path| {
            path != current
                && is_pnl_log_file(path)
                && fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false)
        });
        for path in stale {
            match fs::remove_file(&path) {
                Ok(()) => log::info!("[PNL] pruned {}", path.display()),
                Err(err) => log::debug!("[PNL] failed to prune {}: {}", path.display(), err),
            }
        }
    }
}

pub fn sanitize_pnl_tag(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn is_pnl_log_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("pnl-") && name.ends_with(".jsonl")
}
