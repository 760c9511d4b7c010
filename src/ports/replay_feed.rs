use anyhow::{anyhow, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::pair_stats::PricePoint;

// Mirrors one line of the JSONL price dump
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplaySymbolSnapshot {
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayEntry {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub prices: HashMap<String, ReplaySymbolSnapshot>,
}

impl ReplayEntry {
    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).and_then(|s| s.price.to_f64())
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).map(|s| s.price)
    }
}

/// Bar-by-bar replay of a price dump.
#[derive(Debug)]
pub struct ReplayFeed {
    data: Vec<ReplayEntry>,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut data = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read replay line {}", idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(&line).with_context(|| {
                format!("failed to parse replay entry at line {}: '{}'", idx + 1, line)
            })?;
            data.push(entry);
        }

        Self::from_entries(data)
    }

    pub fn from_entries(data: Vec<ReplayEntry>) -> Result<Self> {
        if data.is_empty() {
            return Err(anyhow!("replay data is empty"));
        }
        for pair in data.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(anyhow!(
                    "replay timestamps must strictly increase ({} followed by {})",
                    pair[0].timestamp,
                    pair[1].timestamp
                ));
            }
        }
        Ok(Self {
            data,
            cursor: AtomicUsize::new(0),
        })
    }

    // Advances the replay by one bar. Returns false at the end.
    pub fn tick(&self) -> bool {
        let current_cursor = self.cursor.load(AtomicOrdering::SeqCst);
        if current_cursor + 1 < self.data.len() {
            self.cursor.fetch_add(1, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn seek(&self, index: usize) -> bool {
        if index < self.data.len() {
            self.cursor.store(index, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(AtomicOrdering::SeqCst)
    }

    pub fn current(&self) -> Option<&ReplayEntry> {
        self.data.get(self.cursor())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.data
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.data
            .iter()
            .flat_map(|e| e.prices.keys().cloned())
            .collect()
    }

    /// Timestamped closes for `symbol` over the first `len` bars of the dump.
    /// Bars where the symbol has no price are left out.
    pub fn leading_points(&self, symbol: &str, len: usize) -> Vec<PricePoint> {
        self.data
            .iter()
            .take(len)
            .filter_map(|e| {
                e.close(symbol).map(|price| PricePoint {
                    ts: e.timestamp,
                    price,
                })
            })
            .collect()
    }
}

pub fn write_jsonl<P: AsRef<Path>>(path: P, entries: &[ReplayEntry]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create replay file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}
