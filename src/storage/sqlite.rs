//! SQLite reading store
//!
//! One row per reading in a `readings` table. Range queries use
//! `created_at`, the relay's receipt time, which is indexed.
//! rusqlite is blocking, so every call hops onto `spawn_blocking`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::error::{StorageError, StorageResult};
use super::store::ReadingStore;
use super::types::{StoredReading, TimeRange};
use crate::telemetry::Reading;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        temperature REAL NOT NULL,
        humidity REAL NOT NULL,
        soil_moisture INTEGER NOT NULL,
        light_level INTEGER NOT NULL,
        rain_drop INTEGER NOT NULL,
        pump_status INTEGER NOT NULL,
        auto_mode INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp);
    CREATE INDEX IF NOT EXISTS idx_readings_created_at ON readings(created_at);
";

type Row = (i64, f64, f64, i32, i32, u8, bool, bool, i64);

/// SQLite-backed [`ReadingStore`]
pub struct SqliteReadingStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteReadingStore {
    /// Create or open a store at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = ?path, "Opened SQLite reading store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, or None for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await?
    }
}

fn millis_to_time(ms: i64, column: &str) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::Corruption(format!("{} out of range: {}", column, ms)))
}

fn row_to_stored(row: Row) -> StorageResult<StoredReading> {
    let (
        ts,
        temperature,
        humidity,
        soil_moisture,
        light_level,
        rain_drop,
        pump_status,
        auto_mode,
        created_at,
    ) = row;

    Ok(StoredReading {
        reading: Reading {
            temperature,
            humidity,
            soil_moisture,
            light_level,
            rain_drop,
            pump_status,
            auto_mode,
            timestamp: millis_to_time(ts, "timestamp")?,
            esp_connected: None,
        },
        received_at: millis_to_time(created_at, "created_at")?,
    })
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn save_received(
        &self,
        reading: &Reading,
        received_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let reading = reading.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO readings (
                    timestamp, temperature, humidity, soil_moisture, light_level,
                    rain_drop, pump_status, auto_mode, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    reading.timestamp.timestamp_millis(),
                    reading.temperature,
                    reading.humidity,
                    reading.soil_moisture,
                    reading.light_level,
                    reading.rain_drop,
                    reading.pump_status,
                    reading.auto_mode,
                    received_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn range(&self, range: TimeRange) -> StorageResult<Vec<StoredReading>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT timestamp, temperature, humidity, soil_moisture, light_level,
                        rain_drop, pump_status, auto_mode, created_at
                 FROM readings
                 WHERE created_at >= ? AND created_at < ?
                 ORDER BY created_at ASC, id ASC",
            )?;

            let rows = stmt
                .query_map(params![range.start, range.end], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                })?
                .collect::<Result<Vec<Row>, _>>()?;

            rows.into_iter().map(row_to_stored).collect()
        })
        .await
    }

    async fn count(&self) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn sample(device_clock: DateTime<Utc>) -> Reading {
        Reading {
            temperature: 28.5,
            humidity: 65.0,
            soil_moisture: 500,
            light_level: 300,
            rain_drop: 1,
            pump_status: false,
            auto_mode: true,
            timestamp: device_clock,
            esp_connected: Some(true),
        }
    }

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_save_and_query_in_memory() {
        let store = SqliteReadingStore::open_in_memory().unwrap();
        store
            .save_received(&sample(minutes_ago(10)), minutes_ago(10))
            .await
            .unwrap();
        store
            .save_received(&sample(minutes_ago(180)), minutes_ago(180))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);

        let recent = store.range(TimeRange::last_hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reading.soil_moisture, 500);
        assert_eq!(recent[0].reading.rain_drop, 1);
        assert!(recent[0].reading.auto_mode);
        // Link flag is transient and not persisted
        assert_eq!(recent[0].reading.esp_connected, None);
    }

    #[tokio::test]
    async fn test_range_uses_receipt_time_not_device_clock() {
        let store = SqliteReadingStore::open_in_memory().unwrap();
        // Controller clock reset to the epoch, received just now
        let epoch = Utc.timestamp_millis_opt(0).single().unwrap();
        store.save(&sample(epoch)).await.unwrap();
        // Controller clock ahead of the relay, received two days ago
        store
            .save_received(&sample(Utc::now()), Utc::now() - Duration::days(2))
            .await
            .unwrap();

        let recent = store.range(TimeRange::last_hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reading.timestamp, epoch);
        assert!(recent[0].received_at > minutes_ago(5));
    }

    #[tokio::test]
    async fn test_range_ordered_by_receipt() {
        let store = SqliteReadingStore::open_in_memory().unwrap();
        for minutes in [5, 50, 20] {
            store
                .save_received(&sample(minutes_ago(0)), minutes_ago(minutes))
                .await
                .unwrap();
        }

        let readings = store.range(TimeRange::last_hours(1)).await.unwrap();
        assert_eq!(readings.len(), 3);
        assert!(readings
            .windows(2)
            .all(|w| w[0].received_at <= w[1].received_at));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");

        {
            let store = SqliteReadingStore::open(&path).unwrap();
            store.save(&sample(minutes_ago(1))).await.unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }

        let store = SqliteReadingStore::open(&path).unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.backend(), "sqlite");
    }
}
