//! Historical tick loading for backtesting.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::Path;

use crate::exchange::Tick;

/// Trait for loading historical ticks.
pub trait TickSource {
    /// All ticks in `[start, end]`, ordered by timestamp.
    fn load_ticks(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Tick>>;

    /// First and last timestamp in the data.
    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;

    fn instruments(&self) -> Vec<String>;
}

/// CSV tick loader.
///
/// Expected CSV format (bid, ask and volume are optional and may be empty):
/// ```csv
/// timestamp,instrument,price,bid,ask,volume
/// 2024-03-04T14:30:00Z,SPY,512.40,512.39,512.41,1200
/// ```
#[derive(Debug, Clone)]
pub struct CsvTickSource {
    /// Sorted by timestamp; rows sharing a timestamp keep file order
    ticks: Vec<Tick>,
}

impl CsvTickSource {
    /// Load ticks from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Parse ticks from CSV content.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut ticks = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.trim_start().starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let tick = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            ticks.push(tick);
        }

        if ticks.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        Ok(Self::from_ticks(ticks))
    }

    /// Create a source from in-memory ticks.
    pub fn from_ticks(mut ticks: Vec<Tick>) -> Self {
        ticks.sort_by_key(|t| t.timestamp);
        Self { ticks }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl TickSource for CsvTickSource {
    fn load_ticks(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Tick>> {
        Ok(self
            .ticks
            .iter()
            .filter(|t| t.timestamp >= start && t.timestamp <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.ticks.first()?;
        let last = self.ticks.last()?;
        Some((first.timestamp, last.timestamp))
    }

    fn instruments(&self) -> Vec<String> {
        self.ticks
            .iter()
            .map(|t| t.instrument.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn parse_row(line: &str) -> Result<Tick> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        anyhow::bail!(
            "Expected at least 3 columns (timestamp,instrument,price), got {}",
            parts.len()
        );
    }

    let timestamp: DateTime<Utc> = parts[0]
        .parse()
        .with_context(|| format!("Invalid timestamp: {}", parts[0]))?;
    anyhow::ensure!(!parts[1].is_empty(), "Empty instrument");
    let price: Decimal = parts[2]
        .parse()
        .with_context(|| format!("Invalid price: {}", parts[2]))?;
    anyhow::ensure!(price > Decimal::ZERO, "Non-positive price: {}", price);

    Ok(Tick {
        instrument: parts[1].to_string(),
        price,
        timestamp,
        bid: optional_column(&parts, 3, "bid")?,
        ask: optional_column(&parts, 4, "ask")?,
        volume: optional_column(&parts, 5, "volume")?,
    })
}

fn optional_column(parts: &[&str], index: usize, name: &str) -> Result<Option<Decimal>> {
    match parts.get(index) {
        None | Some(&"") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: {}", name, raw)),
    }
}
