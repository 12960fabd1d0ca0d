//! Device telemetry as it arrives on the wire
//!
//! Controllers send untyped JSON objects whose fields may be missing, null
//! (a failed sensor read), floats where an ADC integer is expected, or a
//! timestamp in epoch milliseconds. [`TelemetryFrame`] reads whatever it
//! can and never rejects an object; turning it into a complete
//! [`Reading`] is a separate, fallible step.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use super::types::Reading;

/// Best-effort view of one telemetry object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryFrame {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<i32>,
    pub light_level: Option<i32>,
    pub rain_drop: Option<u8>,
    pub pump_status: Option<bool>,
    pub auto_mode: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub esp_connected: Option<bool>,
}

/// A sensor field a complete reading needs was absent or unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("telemetry field '{0}' is missing or not a usable value")]
pub struct MissingField(pub &'static str);

impl TelemetryFrame {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            temperature: object.get("temperature").and_then(number),
            humidity: object.get("humidity").and_then(number),
            soil_moisture: object.get("soilMoisture").and_then(integer),
            light_level: object.get("lightLevel").and_then(integer),
            rain_drop: object
                .get("rainDrop")
                .and_then(integer)
                .and_then(|v| u8::try_from(v).ok()),
            pump_status: object.get("pumpStatus").and_then(flag),
            auto_mode: object.get("autoMode").and_then(flag),
            timestamp: object.get("timestamp").and_then(timestamp),
            esp_connected: object.get("espConnected").and_then(flag),
        }
    }

    /// Complete reading, stamped with `received_at` when the frame has no
    /// usable timestamp
    pub fn to_reading(&self, received_at: DateTime<Utc>) -> Result<Reading, MissingField> {
        Ok(Reading {
            temperature: self.temperature.ok_or(MissingField("temperature"))?,
            humidity: self.humidity.ok_or(MissingField("humidity"))?,
            soil_moisture: self.soil_moisture.ok_or(MissingField("soilMoisture"))?,
            light_level: self.light_level.ok_or(MissingField("lightLevel"))?,
            rain_drop: self.rain_drop.ok_or(MissingField("rainDrop"))?,
            pump_status: self.pump_status.ok_or(MissingField("pumpStatus"))?,
            auto_mode: self.auto_mode.ok_or(MissingField("autoMode"))?,
            timestamp: self.timestamp.unwrap_or(received_at),
            esp_connected: self.esp_connected,
        })
    }

    /// Overlay the fields this frame carries onto `previous`
    pub fn merge_into(&self, previous: &mut Reading, received_at: DateTime<Utc>) {
        if let Some(v) = self.temperature {
            previous.temperature = v;
        }
        if let Some(v) = self.humidity {
            previous.humidity = v;
        }
        if let Some(v) = self.soil_moisture {
            previous.soil_moisture = v;
        }
        if let Some(v) = self.light_level {
            previous.light_level = v;
        }
        if let Some(v) = self.rain_drop {
            previous.rain_drop = v;
        }
        if let Some(v) = self.pump_status {
            previous.pump_status = v;
        }
        if let Some(v) = self.auto_mode {
            previous.auto_mode = v;
        }
        if self.esp_connected.is_some() {
            previous.esp_connected = self.esp_connected;
        }
        previous.timestamp = self.timestamp.unwrap_or(received_at);
    }
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// ADC values sometimes arrive as floats
fn integer(value: &Value) -> Option<i32> {
    match value.as_i64() {
        Some(v) => i32::try_from(v).ok(),
        None => number(value)
            .map(f64::round)
            .filter(|v| *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX))
            .map(|v| v as i32),
    }
}

/// Booleans, or firmware-style 0/1
fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

/// RFC 3339 text or epoch milliseconds
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|v| v as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
