//! Reading History
//!
//! Backs `GET /history?type=24h|7d|30d`: loads the readings received in
//! the window and folds them into hourly (24h) or daily (7d, 30d)
//! averages, oldest bucket first. Windows and buckets use the relay's
//! receipt time; controller clocks drift and reset.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::storage::{ReadingStore, StorageResult, StoredReading, TimeRange};
use crate::telemetry::Reading;

/// Supported history windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    Day,
    Week,
    Month,
}

/// Bucket width used when grouping a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    fn width(self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// Start of the bucket containing `at`
    fn bucket_start(self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.width()).unwrap_or(at)
    }
}

impl HistoryWindow {
    pub fn span(self) -> Duration {
        match self {
            HistoryWindow::Day => Duration::hours(24),
            HistoryWindow::Week => Duration::days(7),
            HistoryWindow::Month => Duration::days(30),
        }
    }

    pub fn granularity(self) -> Granularity {
        match self {
            HistoryWindow::Day => Granularity::Hour,
            HistoryWindow::Week | HistoryWindow::Month => Granularity::Day,
        }
    }

    /// Query range for this window ending at `now`
    pub fn range(self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::ending_at(now, self.span())
    }
}

impl FromStr for HistoryWindow {
    type Err = UnknownWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(HistoryWindow::Day),
            "7d" => Ok(HistoryWindow::Week),
            "30d" => Ok(HistoryWindow::Month),
            other => Err(UnknownWindow(other.to_string())),
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryWindow::Day => write!(f, "24h"),
            HistoryWindow::Week => write!(f, "7d"),
            HistoryWindow::Month => write!(f, "30d"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid history window '{0}' (expected 24h, 7d or 30d)")]
pub struct UnknownWindow(pub String);

/// One averaged bucket of the history series
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    /// RFC 3339 start of the bucket (UTC)
    pub time: String,
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
}

#[derive(Default)]
struct Accumulator {
    temperature: f64,
    humidity: f64,
    soil_moisture: f64,
    samples: u32,
}

impl Accumulator {
    fn add(&mut self, reading: &Reading) {
        self.temperature += reading.temperature;
        self.humidity += reading.humidity;
        self.soil_moisture += f64::from(reading.soil_moisture);
        self.samples += 1;
    }

    fn finish(self, start: DateTime<Utc>) -> HistoryPoint {
        let n = f64::from(self.samples.max(1));
        HistoryPoint {
            time: start.to_rfc3339(),
            temperature: self.temperature / n,
            humidity: self.humidity / n,
            soil_moisture: self.soil_moisture / n,
        }
    }
}

/// Group readings into buckets of `granularity` by receipt time, oldest first
pub fn bucketize(readings: &[StoredReading], granularity: Granularity) -> Vec<HistoryPoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();
    for stored in readings {
        buckets
            .entry(granularity.bucket_start(stored.received_at))
            .or_default()
            .add(&stored.reading);
    }

    buckets
        .into_iter()
        .map(|(start, acc)| acc.finish(start))
        .collect()
}

/// History queries over a [`ReadingStore`]
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn ReadingStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Averaged series for `window` ending now
    pub async fn query(&self, window: HistoryWindow) -> StorageResult<Vec<HistoryPoint>> {
        self.query_at(window, Utc::now()).await
    }

    pub async fn query_at(
        &self,
        window: HistoryWindow,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<HistoryPoint>> {
        let readings = self.store.range(window.range(now)).await?;
        let points = bucketize(&readings, window.granularity());

        tracing::debug!(
            window = %window,
            readings = readings.len(),
            buckets = points.len(),
            "History query"
        );

        Ok(points)
    }
}
