//! Data Transfer Objects
//!
//! Request and response types for the HTTP endpoints.

use serde::{Deserialize, Serialize};

/// Query string of `GET /history`
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// `24h`, `7d` or `30d`
    #[serde(rename = "type")]
    pub window: Option<String>,
}

/// Live socket counts
#[derive(Debug, Serialize)]
pub struct ConnectionCounts {
    pub open: usize,
    pub devices: usize,
    pub consumers: usize,
}

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Reading store backend and whether it answered
    pub store: String,
    pub store_backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readings: Option<u64>,
    pub connections: ConnectionCounts,
    pub uptime_seconds: u64,
    pub version: String,
}
