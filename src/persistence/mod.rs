//! CSV Persistence Module
//!
//! Bundled storage backend for aggregated reference prices: one row per
//! asset per tick, one file per UTC day.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::oracle::AggregateStore;

/// Aggregate price record for CSV storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Tick timestamp in milliseconds
    pub timestamp: i64,
    pub asset: String,
    pub vwap: f64,
}

struct DailyWriter {
    day: String,
    writer: csv::Writer<std::fs::File>,
}

/// CSV persistence manager for aggregates
pub struct CsvAggregateStore {
    dir: PathBuf,
    current: AsyncRwLock<Option<DailyWriter>>,
}

impl CsvAggregateStore {
    /// Create a new store writing under `data_dir/aggregates`
    pub fn new(data_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(data_dir).join("aggregates");
        fs::create_dir_all(&dir).context("Failed to create aggregates directory")?;

        info!(dir = %dir.display(), "CSV aggregate store ready");

        Ok(Self {
            dir,
            current: AsyncRwLock::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(day: &str) -> String {
        format!("aggregates_{}.csv", day)
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Append one record, rotating to a new file when the UTC day changes
    pub async fn save_aggregate(&self, record: AggregateRecord, ts: DateTime<Utc>) -> Result<()> {
        let day = ts.format("%Y-%m-%d").to_string();
        let mut current = self.current.write().await;

        let needs_rotation = current.as_ref().map(|w| w.day != day).unwrap_or(true);
        if needs_rotation {
            let writer = Self::create_writer(&self.dir, &Self::file_name(&day))?;
            *current = Some(DailyWriter {
                day: day.clone(),
                writer,
            });
        }

        let daily = current
            .as_mut()
            .context("Aggregate writer missing after rotation")?;
        daily
            .writer
            .serialize(&record)
            .context("Failed to write aggregate record")?;
        daily
            .writer
            .flush()
            .context("Failed to flush aggregate writer")?;
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for CsvAggregateStore {
    async fn set_aggregate_price(&self, asset: &str, vwap: f64, ts: DateTime<Utc>) -> Result<()> {
        let record = AggregateRecord {
            timestamp: ts.timestamp_millis(),
            asset: asset.to_string(),
            vwap,
        };
        self.save_aggregate(record, ts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use csv::ReaderBuilder;

    fn read_records(path: &Path) -> Vec<AggregateRecord> {
        let mut reader = ReaderBuilder::new().from_path(path).unwrap();
        reader.deserialize().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn writes_header_once_and_appends_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvAggregateStore::new(tmp.path().to_str().unwrap()).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        store.set_aggregate_price("BTCUSDT", 100.5, ts).await.unwrap();
        store.set_aggregate_price("ETHUSDT", 3000.0, ts).await.unwrap();

        let records = read_records(&store.dir().join("aggregates_2024-03-01.csv"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].asset, "BTCUSDT");
        assert_eq!(records[0].vwap, 100.5);
        assert_eq!(records[0].timestamp, ts.timestamp_millis());
    }

    #[tokio::test]
    async fn rotates_file_on_new_day() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvAggregateStore::new(tmp.path().to_str().unwrap()).unwrap();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        tokio_test::assert_ok!(store.set_aggregate_price("BTCUSDT", 1.0, day1).await);
        tokio_test::assert_ok!(store.set_aggregate_price("BTCUSDT", 2.0, day2).await);

        assert_eq!(read_records(&store.dir().join("aggregates_2024-03-01.csv")).len(), 1);
        assert_eq!(read_records(&store.dir().join("aggregates_2024-03-02.csv")).len(), 1);
    }

    #[tokio::test]
    async fn reopening_existing_file_does_not_repeat_header() {
        let tmp = tempfile::tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        {
            let store = CsvAggregateStore::new(tmp.path().to_str().unwrap()).unwrap();
            store.set_aggregate_price("BTCUSDT", 1.0, ts).await.unwrap();
        }
        let store = CsvAggregateStore::new(tmp.path().to_str().unwrap()).unwrap();
        store.set_aggregate_price("BTCUSDT", 2.0, ts).await.unwrap();

        let records = read_records(&store.dir().join("aggregates_2024-03-01.csv"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].vwap, 2.0);
    }
}
