//! WebSocket Message Types
//!
//! Every frame on the relay socket is JSON. Role announcements,
//! commands and status notices carry a `type` tag; any object without a
//! `type` is device telemetry, however incomplete. [`InboundMessage::decode`]
//! classifies a frame once at the boundary so the relay core never
//! branches on raw string fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::{ControlCommand, TelemetryFrame};

/// Tagged frames, used both when decoding and when clients build frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    /// Device role announcement
    #[serde(rename = "init-esp")]
    InitDevice,
    /// Consumer role announcement under a client-chosen key
    #[serde(rename = "init-frontend")]
    InitConsumer {
        #[serde(rename = "frontendId")]
        key: String,
    },
    /// Pump / auto-mode instruction for every device
    #[serde(rename = "command")]
    Command(ControlCommand),
    /// Ask devices to re-send their current state
    #[serde(rename = "refresh")]
    Refresh,
    /// Relay notice to consumers that a device came online
    #[serde(rename = "device-status")]
    DeviceStatus {
        #[serde(rename = "espConnected")]
        esp_connected: bool,
    },
}

impl ControlFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AnnounceDevice,
    AnnounceConsumer { key: String },
    Telemetry(TelemetryFrame),
    Command(ControlCommand),
    Refresh,
    DeviceStatus { esp_connected: bool },
    /// Valid JSON that matches no known frame
    Unknown { kind: Option<String> },
}

impl InboundMessage {
    /// Classify one text frame
    ///
    /// Only unparseable JSON is an error; anything parseable but
    /// unrecognised comes back as [`InboundMessage::Unknown`].
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: Value) -> Self {
        let kind = match value.get("type") {
            None => None,
            Some(Value::String(kind)) => Some(kind.clone()),
            Some(other) => Some(other.to_string()),
        };

        match kind {
            Some(kind) => match serde_json::from_value::<ControlFrame>(value) {
                Ok(frame) => frame.into(),
                Err(_) => InboundMessage::Unknown { kind: Some(kind) },
            },
            None => match value.as_object() {
                Some(object) => InboundMessage::Telemetry(TelemetryFrame::from_object(object)),
                None => InboundMessage::Unknown { kind: None },
            },
        }
    }

    /// Short name for logs
    pub fn label(&self) -> &str {
        match self {
            InboundMessage::AnnounceDevice => "init-esp",
            InboundMessage::AnnounceConsumer { .. } => "init-frontend",
            InboundMessage::Telemetry(_) => "telemetry",
            InboundMessage::Command(_) => "command",
            InboundMessage::Refresh => "refresh",
            InboundMessage::DeviceStatus { .. } => "device-status",
            InboundMessage::Unknown { kind: Some(kind) } => kind.as_str(),
            InboundMessage::Unknown { kind: None } => "unknown",
        }
    }
}

impl From<ControlFrame> for InboundMessage {
    fn from(frame: ControlFrame) -> Self {
        match frame {
            ControlFrame::InitDevice => InboundMessage::AnnounceDevice,
            ControlFrame::InitConsumer { key } => InboundMessage::AnnounceConsumer { key },
            ControlFrame::Command(command) => InboundMessage::Command(command),
            ControlFrame::Refresh => InboundMessage::Refresh,
            ControlFrame::DeviceStatus { esp_connected } => {
                InboundMessage::DeviceStatus { esp_connected }
            }
        }
    }
}
