//! Relay Core
//!
//! Classifies each inbound frame against the sender's role and acts on it:
//!
//! ```text
//! Unassigned --init-esp-----------> Device
//! Unassigned --init-frontend{key}-> Consumer
//! Unassigned --anything else------> Unassigned (dropped, "unknown")
//! Device     --telemetry----------> fan out to consumers + persist if complete
//! Consumer   --command / refresh--> fan out to devices
//! ```
//!
//! Nothing here closes a connection or returns an error to the sender.
//! Frames are forwarded verbatim; the relay never interprets commands.
//! Telemetry is forwarded even when a field is null or missing; only the
//! saved copy needs a complete reading.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::messages::{ControlFrame, InboundMessage};
use super::registry::{ConnectionRegistry, Peer, Role};
use crate::storage::ReadingStore;
use crate::telemetry::TelemetryFrame;

/// Relay behaviour switches
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tell consumers when a device announces itself
    pub notify_device_online: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            notify_device_online: true,
        }
    }
}

/// Why a frame was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not parseable JSON
    Malformed,
    /// Unassigned sender, or a frame matching no known shape
    Unknown,
    /// Known frame from a role that may not send it
    Unexpected,
    /// Sender is no longer registered
    Closed,
}

/// What the relay did with one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    RegisteredDevice,
    RegisteredConsumer { superseded: Option<String> },
    /// Fanned out; `delivered` counts peers that accepted the frame
    Forwarded { delivered: usize },
    Dropped(DropReason),
}

/// Message-driven relay between devices and consumers
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ReadingStore>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn ReadingStore>,
        config: RelayConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one text frame from connection `id`
    pub async fn on_message(&self, id: &str, raw: &str) -> Dispatch {
        let received_at = Utc::now();
        let message = match InboundMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Discarding malformed frame");
                return Dispatch::Dropped(DropReason::Malformed);
            }
        };

        let Some(role) = self.registry.role(id).await else {
            tracing::debug!(connection_id = %id, "Frame from closed connection");
            return Dispatch::Dropped(DropReason::Closed);
        };

        match (role, message) {
            (Role::Unassigned, InboundMessage::AnnounceDevice) => self.register_device(id).await,
            (Role::Unassigned, InboundMessage::AnnounceConsumer { key }) => {
                self.register_consumer(id, &key).await
            }
            (Role::Unassigned, message) => {
                tracing::warn!(
                    connection_id = %id,
                    message = %message.label(),
                    "Unknown frame before role announcement"
                );
                Dispatch::Dropped(DropReason::Unknown)
            }
            (Role::Device, InboundMessage::Telemetry(frame)) => {
                self.persist(id, &frame, received_at);
                let delivered = self.fan_out(self.registry.consumers().await, raw).await;
                tracing::trace!(connection_id = %id, delivered, "Telemetry relayed");
                Dispatch::Forwarded { delivered }
            }
            (Role::Consumer, InboundMessage::Command(_) | InboundMessage::Refresh) => {
                let delivered = self.fan_out(self.registry.devices().await, raw).await;
                tracing::debug!(connection_id = %id, delivered, "Control frame relayed");
                Dispatch::Forwarded { delivered }
            }
            (_, InboundMessage::Unknown { kind }) => {
                tracing::debug!(
                    connection_id = %id,
                    role = %role,
                    kind = ?kind,
                    "Discarding unrecognised frame"
                );
                Dispatch::Dropped(DropReason::Unknown)
            }
            (role, message) => {
                tracing::warn!(
                    connection_id = %id,
                    role = %role,
                    message = %message.label(),
                    "Unexpected frame for role"
                );
                Dispatch::Dropped(DropReason::Unexpected)
            }
        }
    }

    /// Socket closed or errored; safe to call any number of times
    pub async fn on_close(&self, id: &str) {
        self.registry.unregister(id).await;
    }

    async fn register_device(&self, id: &str) -> Dispatch {
        if let Err(e) = self.registry.register_device(id).await {
            tracing::warn!(connection_id = %id, error = %e, "Device announcement ignored");
            return Dispatch::Dropped(DropReason::Unexpected);
        }

        if self.config.notify_device_online {
            match (ControlFrame::DeviceStatus {
                esp_connected: true,
            })
            .to_json()
            {
                Ok(notice) => {
                    self.fan_out(self.registry.consumers().await, &notice).await;
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode device status"),
            }
        }

        Dispatch::RegisteredDevice
    }

    async fn register_consumer(&self, id: &str, key: &str) -> Dispatch {
        match self.registry.register_consumer(id, key).await {
            Ok(superseded) => Dispatch::RegisteredConsumer { superseded },
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Consumer announcement ignored");
                Dispatch::Dropped(DropReason::Unexpected)
            }
        }
    }

    /// Save a complete reading on a detached task; failures are only logged
    fn persist(&self, id: &str, frame: &TelemetryFrame, received_at: DateTime<Utc>) {
        let reading = match frame.to_reading(received_at) {
            Ok(reading) => reading,
            Err(missing) => {
                tracing::warn!(
                    connection_id = %id,
                    error = %missing,
                    "Skipping save of incomplete reading"
                );
                return;
            }
        };

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.save_received(&reading, received_at).await {
                Ok(()) => tracing::debug!(backend = store.backend(), "Reading saved"),
                Err(e) => tracing::error!(error = %e, "Failed to save reading"),
            }
        });
    }

    /// Queue `frame` on every peer; peers whose writer is gone are unregistered
    async fn fan_out(&self, peers: Vec<Peer>, frame: &str) -> usize {
        let frame: Arc<str> = Arc::from(frame);
        let mut delivered = 0;
        let mut dead = Vec::new();

        for peer in peers {
            if peer.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                dead.push(peer.id);
            }
        }

        for id in dead {
            tracing::debug!(connection_id = %id, "Dropping peer with closed transport");
            self.registry.unregister(&id).await;
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        MemoryReadingStore, StorageError, StorageResult, StoredReading, TimeRange,
    };
    use crate::telemetry::Reading;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TELEMETRY: &str = r#"{"temperature":28.5,"humidity":65,"soilMoisture":500,"lightLevel":300,"rainDrop":1,"pumpStatus":false,"autoMode":true}"#;
    const PUMP_ON: &str = r#"{"type":"command","command":"pump","value":"on"}"#;

    type Inbox = mpsc::UnboundedReceiver<Arc<str>>;

    struct Harness {
        relay: Relay,
        store: Arc<MemoryReadingStore>,
    }

    impl Harness {
        fn new(config: RelayConfig) -> Self {
            let store = Arc::new(MemoryReadingStore::new());
            let relay = Relay::new(
                Arc::new(ConnectionRegistry::default()),
                store.clone(),
                config,
            );
            Self { relay, store }
        }

        async fn connect(&self) -> (String, Inbox) {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = self.relay.registry().open(tx).await.unwrap();
            (id, rx)
        }

        async fn device(&self) -> (String, Inbox) {
            let (id, rx) = self.connect().await;
            let dispatch = self.relay.on_message(&id, r#"{"type":"init-esp"}"#).await;
            assert_eq!(dispatch, Dispatch::RegisteredDevice);
            (id, rx)
        }

        async fn consumer(&self, key: &str) -> (String, Inbox) {
            let (id, rx) = self.connect().await;
            let announce = format!(r#"{{"type":"init-frontend","frontendId":"{}"}}"#, key);
            let dispatch = self.relay.on_message(&id, &announce).await;
            assert!(matches!(dispatch, Dispatch::RegisteredConsumer { .. }));
            (id, rx)
        }

        async fn wait_for_saves(&self, expected: u64) {
            for _ in 0..100 {
                if self.store.count().await.unwrap() >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("store never reached {} readings", expected);
        }
    }

    fn quiet() -> RelayConfig {
        RelayConfig {
            notify_device_online: false,
        }
    }

    fn drain(inbox: &mut Inbox) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = inbox.try_recv() {
            frames.push(frame.to_string());
        }
        frames
    }

    #[tokio::test]
    async fn test_telemetry_reaches_every_consumer_and_is_saved_once() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;
        let (_a, mut a_rx) = h.consumer("a").await;
        let (_b, mut b_rx) = h.consumer("b").await;

        let dispatch = h.relay.on_message(&device, TELEMETRY).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 2 });

        assert_eq!(drain(&mut a_rx), vec![TELEMETRY.to_string()]);
        assert_eq!(drain(&mut b_rx), vec![TELEMETRY.to_string()]);

        h.wait_for_saves(1).await;
        let saved = h.store.snapshot().await;
        assert_eq!(saved.len(), 1);
        let reading = &saved[0].reading;
        assert_eq!(reading.temperature, 28.5);
        assert_eq!(reading.humidity, 65.0);
        assert_eq!(reading.soil_moisture, 500);
        assert_eq!(reading.light_level, 300);
        assert_eq!(reading.rain_drop, 1);
        assert!(!reading.pump_status);
        assert!(reading.auto_mode);
        // No controller timestamp, so it carries the receipt time
        assert_eq!(reading.timestamp, saved[0].received_at);
    }

    #[tokio::test]
    async fn test_null_sensor_value_forwarded_but_not_saved() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;
        let (_a, mut a_rx) = h.consumer("a").await;

        let frame = r#"{"temperature":28.5,"humidity":null,"soilMoisture":500,"lightLevel":300,"rainDrop":0,"pumpStatus":false,"autoMode":true}"#;
        let dispatch = h.relay.on_message(&device, frame).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
        assert_eq!(drain(&mut a_rx), vec![frame.to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_firmware_number_formats_forwarded_and_saved() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;
        let (_a, mut a_rx) = h.consumer("a").await;

        let float_adc = r#"{"temperature":28.5,"humidity":65,"soilMoisture":500.0,"lightLevel":300,"rainDrop":1,"pumpStatus":false,"autoMode":true}"#;
        let epoch_ms = r#"{"temperature":28.5,"humidity":65,"soilMoisture":510,"lightLevel":300,"rainDrop":1,"pumpStatus":false,"autoMode":true,"timestamp":1714557600000}"#;

        for frame in [float_adc, epoch_ms] {
            let dispatch = h.relay.on_message(&device, frame).await;
            assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
            assert_eq!(drain(&mut a_rx), vec![frame.to_string()]);
        }

        h.wait_for_saves(2).await;
        let mut saved: Vec<Reading> = h
            .store
            .snapshot()
            .await
            .into_iter()
            .map(|s| s.reading)
            .collect();
        saved.sort_by_key(|r| r.soil_moisture);
        assert_eq!(saved[0].soil_moisture, 500);
        assert_eq!(saved[1].soil_moisture, 510);
        assert_eq!(saved[1].timestamp.timestamp_millis(), 1_714_557_600_000);
    }

    #[tokio::test]
    async fn test_saved_with_relay_receipt_time() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;

        // Controller clock reset to the epoch
        let frame = r#"{"temperature":20,"humidity":40,"soilMoisture":700,"lightLevel":100,"rainDrop":0,"pumpStatus":false,"autoMode":true,"timestamp":0}"#;
        let before = Utc::now();
        h.relay.on_message(&device, frame).await;

        h.wait_for_saves(1).await;
        let saved = h.store.snapshot().await;
        assert_eq!(saved[0].reading.timestamp.timestamp_millis(), 0);
        assert!(saved[0].received_at >= before);
        assert_eq!(h.store.range(TimeRange::last_hours(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_command_reaches_device_and_is_not_saved() {
        let h = Harness::new(quiet());
        let (_device, mut device_rx) = h.device().await;
        let (consumer, _consumer_rx) = h.consumer("a").await;

        let dispatch = h.relay.on_message(&consumer, PUMP_ON).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
        assert_eq!(drain(&mut device_rx), vec![PUMP_ON.to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_reaches_devices() {
        let h = Harness::new(quiet());
        let (_d1, mut d1_rx) = h.device().await;
        let (_d2, mut d2_rx) = h.device().await;
        let (consumer, _rx) = h.consumer("a").await;

        let refresh = r#"{"type":"refresh"}"#;
        assert_eq!(
            h.relay.on_message(&consumer, refresh).await,
            Dispatch::Forwarded { delivered: 2 }
        );
        assert_eq!(drain(&mut d1_rx), vec![refresh.to_string()]);
        assert_eq!(drain(&mut d2_rx), vec![refresh.to_string()]);
    }

    #[tokio::test]
    async fn test_closed_consumer_not_targeted() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;
        let (gone, gone_rx) = h.consumer("a").await;
        let (_live, mut live_rx) = h.consumer("b").await;

        drop(gone_rx);
        h.relay.on_close(&gone).await;

        let dispatch = h.relay.on_message(&device, TELEMETRY).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
        assert_eq!(drain(&mut live_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_dead_writer_unregistered_during_fan_out() {
        let h = Harness::new(quiet());
        let (device, _device_rx) = h.device().await;
        let (dead, dead_rx) = h.consumer("a").await;
        let (_live, mut live_rx) = h.consumer("b").await;

        // Writer gone without a close event yet
        drop(dead_rx);

        let dispatch = h.relay.on_message(&device, TELEMETRY).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
        assert_eq!(drain(&mut live_rx).len(), 1);
        assert_eq!(h.relay.registry().role(&dead).await, None);
        assert_eq!(h.relay.registry().consumer_for_key("a").await, None);
        assert_eq!(h.relay.registry().stats().await.consumers, 1);

        // The late close from its socket task is harmless
        h.relay.on_close(&dead).await;
        assert_eq!(
            h.relay.on_message(&device, TELEMETRY).await,
            Dispatch::Forwarded { delivered: 1 }
        );
    }

    #[tokio::test]
    async fn test_second_announce_ignored() {
        let h = Harness::new(quiet());
        let (device, _rx) = h.device().await;

        let dispatch = h
            .relay
            .on_message(&device, r#"{"type":"init-frontend","frontendId":"x"}"#)
            .await;
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::Unexpected));
        assert_eq!(h.relay.registry().role(&device).await, Some(Role::Device));

        let dispatch = h.relay.on_message(&device, r#"{"type":"init-esp"}"#).await;
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::Unexpected));
        assert_eq!(h.relay.registry().stats().await.devices, 1);
    }

    #[tokio::test]
    async fn test_unassigned_frames_dropped() {
        let h = Harness::new(quiet());
        let (id, _rx) = h.connect().await;
        let (_consumer, mut consumer_rx) = h.consumer("a").await;

        assert_eq!(
            h.relay.on_message(&id, TELEMETRY).await,
            Dispatch::Dropped(DropReason::Unknown)
        );
        assert!(drain(&mut consumer_rx).is_empty());
        assert_eq!(h.relay.registry().role(&id).await, Some(Role::Unassigned));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let h = Harness::new(quiet());
        let (device, _rx) = h.device().await;

        assert_eq!(
            h.relay.on_message(&device, "{not json").await,
            Dispatch::Dropped(DropReason::Malformed)
        );
        assert_eq!(h.relay.registry().role(&device).await, Some(Role::Device));
    }

    #[tokio::test]
    async fn test_wrong_direction_dropped() {
        let h = Harness::new(quiet());
        let (device, mut device_rx) = h.device().await;
        let (consumer, mut consumer_rx) = h.consumer("a").await;

        assert_eq!(
            h.relay.on_message(&device, PUMP_ON).await,
            Dispatch::Dropped(DropReason::Unexpected)
        );
        assert_eq!(
            h.relay.on_message(&consumer, TELEMETRY).await,
            Dispatch::Dropped(DropReason::Unexpected)
        );
        assert!(drain(&mut device_rx).is_empty());
        assert!(drain(&mut consumer_rx).is_empty());
    }

    #[tokio::test]
    async fn test_frame_after_close_dropped() {
        let h = Harness::new(quiet());
        let (device, _rx) = h.device().await;
        h.relay.on_close(&device).await;
        h.relay.on_close(&device).await;

        assert_eq!(
            h.relay.on_message(&device, TELEMETRY).await,
            Dispatch::Dropped(DropReason::Closed)
        );
    }

    #[tokio::test]
    async fn test_device_online_notice() {
        let h = Harness::new(RelayConfig::default());
        let (_consumer, mut consumer_rx) = h.consumer("a").await;
        let (_device, _device_rx) = h.device().await;

        assert_eq!(
            drain(&mut consumer_rx),
            vec![r#"{"type":"device-status","espConnected":true}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_many_consumers_each_get_one_copy() {
        let h = Harness::new(quiet());
        let (device, _rx) = h.device().await;
        let mut inboxes = Vec::new();
        for i in 0..25 {
            inboxes.push(h.consumer(&format!("c{}", i)).await.1);
        }

        let dispatch = h.relay.on_message(&device, TELEMETRY).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 25 });
        for inbox in inboxes.iter_mut() {
            assert_eq!(drain(inbox).len(), 1);
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn save_received(
            &self,
            _reading: &Reading,
            _received_at: DateTime<Utc>,
        ) -> StorageResult<()> {
            Err(StorageError::Task("disk full".to_string()))
        }

        async fn range(&self, _range: TimeRange) -> StorageResult<Vec<StoredReading>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> StorageResult<u64> {
            Ok(0)
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_fan_out() {
        let registry = Arc::new(ConnectionRegistry::default());
        let relay = Relay::new(Arc::clone(&registry), Arc::new(FailingStore), quiet());

        let (dtx, _drx) = mpsc::unbounded_channel();
        let (ctx, mut crx) = mpsc::unbounded_channel();
        let device = registry.open(dtx).await.unwrap();
        let consumer = registry.open(ctx).await.unwrap();
        relay.on_message(&device, r#"{"type":"init-esp"}"#).await;
        relay
            .on_message(&consumer, r#"{"type":"init-frontend","frontendId":"a"}"#)
            .await;

        let dispatch = relay.on_message(&device, TELEMETRY).await;
        assert_eq!(dispatch, Dispatch::Forwarded { delivered: 1 });
        assert_eq!(drain(&mut crx), vec![TELEMETRY.to_string()]);
        assert_eq!(registry.role(&device).await, Some(Role::Device));
    }
}
