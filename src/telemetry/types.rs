//! Telemetry data types
//!
//! - `Reading`: one snapshot of every sensor on a field controller
//! - `ControlCommand`: a dashboard instruction for the controllers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single sensor reading emitted by a device
///
/// Field names follow the controller firmware's JSON (camelCase).
/// Soil moisture and light level are raw ADC values in `0..=1024`;
/// use [`crate::telemetry::calibration`] to map them for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Raw soil moisture (0 = wet, 1024 = dry)
    pub soil_moisture: i32,
    /// Raw light level (0 = bright, 1024 = dark)
    pub light_level: i32,
    /// Rain sensor: 1 when rain is detected
    pub rain_drop: u8,
    /// Whether the pump is currently running
    pub pump_status: bool,
    /// Whether the controller runs the pump on its own
    pub auto_mode: bool,
    /// Time of the reading; stamped on receipt when the device omits it
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Controller-reported link flag, forwarded to dashboards when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esp_connected: Option<bool>,
}

impl Reading {
    /// Whether the rain sensor is reporting rain
    pub fn is_raining(&self) -> bool {
        self.rain_drop != 0
    }
}

/// On/off value carried by control commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on {
            Switch::On
        } else {
            Switch::Off
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::On => write!(f, "on"),
            Switch::Off => write!(f, "off"),
        }
    }
}

/// What a control command acts on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandKind {
    #[serde(rename = "pump")]
    Pump,
    #[serde(rename = "autoMode")]
    AutoMode,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Pump => write!(f, "pump"),
            CommandKind::AutoMode => write!(f, "autoMode"),
        }
    }
}

/// A control instruction from a dashboard to every connected device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlCommand {
    pub command: CommandKind,
    pub value: Switch,
}

impl ControlCommand {
    pub fn new(command: CommandKind, value: Switch) -> Self {
        Self { command, value }
    }
}
