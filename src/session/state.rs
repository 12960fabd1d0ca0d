//! Local view a session keeps of the relay

use chrono::{DateTime, Utc};
use std::fmt;

use crate::telemetry::{CommandKind, ControlCommand, Reading, TelemetryFrame};

/// Socket lifecycle of a reconnecting session
///
/// ```text
/// Disconnected --timer--> Connecting --handshake--> Open
///      ^                      |                      |
///      +------ error ---------+------ close ---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Open => write!(f, "open"),
        }
    }
}

/// Latest known controller state as seen through the relay
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub reading: Option<Reading>,
    /// When the last telemetry or status frame arrived
    pub last_updated: Option<DateTime<Utc>>,
    /// Controller online flag; keeps its previous value when a frame omits it
    pub esp_connected: bool,
    pub link: LinkState,
}

impl DashboardState {
    /// Fold in a telemetry frame
    pub fn apply_reading(&mut self, reading: Reading, at: DateTime<Utc>) {
        if let Some(connected) = reading.esp_connected {
            self.esp_connected = connected;
        }
        self.reading = Some(reading);
        self.last_updated = Some(at);
    }

    /// Fold in a telemetry frame that may be partial
    ///
    /// Fields the frame lacks keep their previous values. Returns the
    /// updated reading, or None while no complete reading has been seen.
    pub fn apply_telemetry(
        &mut self,
        frame: &TelemetryFrame,
        at: DateTime<Utc>,
    ) -> Option<Reading> {
        let reading = match self.reading.clone() {
            Some(mut previous) => {
                frame.merge_into(&mut previous, at);
                previous
            }
            None => match frame.to_reading(at) {
                Ok(reading) => reading,
                Err(missing) => {
                    tracing::debug!(error = %missing, "Waiting for a complete reading");
                    if let Some(connected) = frame.esp_connected {
                        self.esp_connected = connected;
                    }
                    self.last_updated = Some(at);
                    return None;
                }
            },
        };

        self.apply_reading(reading.clone(), at);
        Some(reading)
    }

    pub fn apply_device_status(&mut self, esp_connected: bool, at: DateTime<Utc>) {
        self.esp_connected = esp_connected;
        self.last_updated = Some(at);
    }

    /// Reflect a command on the current reading
    ///
    /// Returns false when there is no reading to update yet.
    pub fn apply_command(&mut self, command: &ControlCommand) -> bool {
        let Some(reading) = self.reading.as_mut() else {
            return false;
        };
        match command.command {
            CommandKind::Pump => reading.pump_status = command.value.is_on(),
            CommandKind::AutoMode => reading.auto_mode = command.value.is_on(),
        }
        true
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            reading: None,
            last_updated: None,
            esp_connected: false,
            link: LinkState::Disconnected,
        }
    }
}
