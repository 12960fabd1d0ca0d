//! Telemetry Domain
//!
//! Sensor readings produced by field controllers, the control commands
//! dashboards send back, and the calibration helpers dashboards use to
//! turn raw sensor values into display percentages and status bands.

pub mod calibration;
mod frame;
mod types;

pub use calibration::{
    light_percent, rain_label, soil_moisture_percent, Band, Metric, Thresholds, HUMIDITY,
    SENSOR_FULL_SCALE, SOIL_MOISTURE, TEMPERATURE,
};
pub use frame::{MissingField, TelemetryFrame};
pub use types::{CommandKind, ControlCommand, Reading, Switch};
