//! In-memory reading store
//!
//! Keeps readings in a `Vec` for tests and for deployments that run
//! without persistence (`storage.backend = "memory"`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::error::StorageResult;
use super::store::ReadingStore;
use super::types::{StoredReading, TimeRange};
use crate::telemetry::Reading;

#[derive(Default)]
pub struct MemoryReadingStore {
    readings: RwLock<Vec<StoredReading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything saved so far, in save order
    pub async fn snapshot(&self) -> Vec<StoredReading> {
        self.readings.read().await.clone()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn save_received(
        &self,
        reading: &Reading,
        received_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.readings.write().await.push(StoredReading {
            reading: reading.clone(),
            received_at,
        });
        Ok(())
    }

    async fn range(&self, range: TimeRange) -> StorageResult<Vec<StoredReading>> {
        let mut matched: Vec<StoredReading> = self
            .readings
            .read()
            .await
            .iter()
            .filter(|r| range.contains(r.received_at.timestamp_millis()))
            .cloned()
            .collect();
        // Stable, so equal receipt times keep save order
        matched.sort_by_key(|r| r.received_at);
        Ok(matched)
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.readings.read().await.len() as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading() -> Reading {
        Reading {
            temperature: 20.0,
            humidity: 50.0,
            soil_moisture: 400,
            light_level: 300,
            rain_drop: 0,
            pump_status: false,
            auto_mode: true,
            timestamp: Utc::now(),
            esp_connected: None,
        }
    }

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_save_and_count() {
        let store = MemoryReadingStore::new();
        store.save(&reading()).await.unwrap();
        store.save(&reading()).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_range_filters_and_sorts_by_receipt() {
        let store = MemoryReadingStore::new();
        store.save_received(&reading(), minutes_ago(5)).await.unwrap();
        store.save_received(&reading(), minutes_ago(120)).await.unwrap();
        store.save_received(&reading(), minutes_ago(30)).await.unwrap();

        let found = store.range(TimeRange::last_hours(1)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].received_at < found[1].received_at);
    }

    #[tokio::test]
    async fn test_device_clock_does_not_affect_range() {
        let store = MemoryReadingStore::new();
        let mut stale = reading();
        stale.timestamp = Utc::now() - Duration::days(400);
        store.save(&stale).await.unwrap();

        let found = store.range(TimeRange::last_hours(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reading.timestamp, stale.timestamp);
    }
}
