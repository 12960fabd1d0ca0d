//! Reading Store Adapter
//!
//! The relay persists every complete device reading through [`ReadingStore`].
//! Saves are dispatched as detached tasks, so an implementation may be
//! slow without delaying fan-out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::types::{StoredReading, TimeRange};
use crate::telemetry::Reading;

/// Durable sink for device readings
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading received at `received_at`
    async fn save_received(&self, reading: &Reading, received_at: DateTime<Utc>)
        -> StorageResult<()>;

    /// Persist one reading received now
    async fn save(&self, reading: &Reading) -> StorageResult<()> {
        self.save_received(reading, Utc::now()).await
    }

    /// Readings received inside `range`, oldest receipt first
    async fn range(&self, range: TimeRange) -> StorageResult<Vec<StoredReading>>;

    /// Total number of stored readings
    async fn count(&self) -> StorageResult<u64>;

    /// Short backend name for health output
    fn backend(&self) -> &'static str;
}
