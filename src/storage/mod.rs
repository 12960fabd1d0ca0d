//! Reading Storage
//!
//! The Store Adapter the relay persists device readings through:
//!
//! - **store**: the [`ReadingStore`] trait
//! - **sqlite**: durable SQLite backend
//! - **memory**: in-process backend for tests and ephemeral deployments
//! - **types**: [`StoredReading`] and query types ([`TimeRange`])
//! - **error**: error types
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldrelay::storage::{ReadingStore, SqliteReadingStore, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteReadingStore::open("./fieldrelay_data/readings.db")?;
//!     let last_day = store.range(TimeRange::last_hours(24)).await?;
//!     println!("{} readings in the last 24h", last_day.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryReadingStore;
pub use sqlite::SqliteReadingStore;
pub use store::ReadingStore;
pub use types::{StoredReading, TimeRange};

use crate::config::StorageConfig;

/// Build the store selected by `config.backend`
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn ReadingStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteReadingStore::open(&config.db_path)?)),
        "memory" => Ok(Arc::new(MemoryReadingStore::new())),
        other => Err(StorageError::Config(format!(
            "unknown storage backend '{}' (expected sqlite or memory)",
            other
        ))),
    }
}
