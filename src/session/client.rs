//! Reconnecting relay session
//!
//! Owns one socket to the relay at a time. Every time the socket opens the
//! session announces its role, then folds inbound telemetry into its
//! [`DashboardState`] and [`RollingHistory`]. When the socket closes or
//! fails it waits a fixed delay and dials again, forever, until
//! [`ReconnectingSession::close`] is called.
//!
//! [`send_once`] covers the other case: a single control frame sent over a
//! short-lived socket without disturbing any long-lived dashboard.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::history::{HistoryEntry, RollingHistory, DEFAULT_HISTORY_CAPACITY};
use super::state::{DashboardState, LinkState};
use crate::config::SessionConfig;
use crate::telemetry::{CommandKind, ControlCommand, Switch};
use crate::websocket::{ControlFrame, InboundMessage};

/// Inbound frames buffered per subscriber before it starts lagging
const EVENT_BUFFER: usize = 256;

/// Which side of the relay a session speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Device,
    Consumer { key: String },
}

impl SessionRole {
    fn announcement(&self) -> ControlFrame {
        match self {
            SessionRole::Device => ControlFrame::InitDevice,
            SessionRole::Consumer { key } => ControlFrame::InitConsumer { key: key.clone() },
        }
    }
}

/// Connection settings for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Relay WebSocket URL, e.g. `ws://localhost:3000`
    pub url: String,
    /// Fixed wait between a close and the next dial
    pub reconnect_delay: Duration,
    pub history_capacity: usize,
}

impl SessionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(3),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: config.reconnect_delay(),
            history_capacity: config.history_capacity,
        }
    }
}

/// Why one connection attempt ended
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("relay at {url} did not finish within {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}

/// State shared between the session handle and its background task
struct Shared {
    state: RwLock<DashboardState>,
    history: RwLock<RollingHistory>,
    /// Outbound queue of the currently open socket, if any
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    link: watch::Sender<LinkState>,
    events: broadcast::Sender<InboundMessage>,
}

impl Shared {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn set_link(&self, link: LinkState) {
        self.state.write().await.link = link;
        self.link.send_replace(link);
    }

    /// Fold one inbound text frame into local state
    async fn ingest(&self, raw: &str) {
        let message = match InboundMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-JSON frame");
                return;
            }
        };

        let now = Utc::now();
        match &message {
            InboundMessage::Telemetry(frame) => {
                let updated = self.state.write().await.apply_telemetry(frame, now);
                if let Some(reading) = updated {
                    self.history.write().await.push_at(reading, now);
                }
            }
            InboundMessage::DeviceStatus { esp_connected } => {
                self.state
                    .write()
                    .await
                    .apply_device_status(*esp_connected, now);
            }
            InboundMessage::Command(command) => {
                self.state.write().await.apply_command(command);
            }
            other => {
                tracing::trace!(kind = other.label(), "Frame not folded into state");
            }
        }

        // No subscribers is fine
        let _ = self.events.send(message);
    }
}

/// Handle to a background session task
///
/// Dropping the handle stops reconnection; call [`close`](Self::close) to
/// also wait for the socket to shut down.
pub struct ReconnectingSession {
    shared: Arc<Shared>,
    role: SessionRole,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectingSession {
    /// Start dialing the relay in the background
    pub fn spawn(role: SessionRole, options: SessionOptions) -> Self {
        let (link, _) = watch::channel(LinkState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared {
            state: RwLock::new(DashboardState::default()),
            history: RwLock::new(RollingHistory::new(options.history_capacity)),
            outbound: Mutex::new(None),
            link,
            events,
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&shared),
            role.clone(),
            options,
            cancel.clone(),
        ));

        Self {
            shared,
            role,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    pub fn role(&self) -> &SessionRole {
        &self.role
    }

    /// Queue a raw text frame on the open socket
    ///
    /// Best effort: returns false and drops the payload when no socket is
    /// open. Nothing is buffered across reconnects.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        match self.shared.outbound().as_ref() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }

    pub fn send_frame(&self, frame: &ControlFrame) -> bool {
        match frame.to_json() {
            Ok(json) => self.send(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode control frame");
                false
            }
        }
    }

    pub fn send_command(&self, command: CommandKind, value: Switch) -> bool {
        self.send_frame(&ControlFrame::Command(ControlCommand::new(command, value)))
    }

    /// Ask every device to re-send its state
    pub fn refresh(&self) -> bool {
        self.send_frame(&ControlFrame::Refresh)
    }

    pub async fn current_state(&self) -> DashboardState {
        self.shared.state.read().await.clone()
    }

    /// Received readings, oldest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.history.read().await.snapshot()
    }

    pub fn link_state(&self) -> LinkState {
        *self.shared.link.borrow()
    }

    /// Watch link transitions
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.shared.link.subscribe()
    }

    /// Every decoded inbound frame, including ones that do not touch state
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.shared.events.subscribe()
    }

    /// Wait until the link is open or `timeout` elapses
    pub async fn wait_open(&self, timeout: Duration) -> bool {
        let mut link = self.watch_link();
        tokio::time::timeout(timeout, link.wait_for(|state| *state == LinkState::Open))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Stop reconnecting, close the socket and wait for the task to end
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Session task ended abnormally");
            }
        }
    }
}

impl Drop for ReconnectingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reconnect loop; only one socket is ever in flight
async fn run(
    shared: Arc<Shared>,
    role: SessionRole,
    options: SessionOptions,
    cancel: CancellationToken,
) {
    let mut attempt: u64 = 0;

    while !cancel.is_cancelled() {
        attempt += 1;
        shared.set_link(LinkState::Connecting).await;

        match connect_once(&shared, &role, &options, &cancel).await {
            Ok(()) => {
                tracing::info!(url = %options.url, "Relay connection closed");
            }
            Err(e) => {
                tracing::warn!(url = %options.url, attempt, error = %e, "Relay connection lost");
            }
        }

        shared.outbound().take();
        shared.set_link(LinkState::Disconnected).await;

        if cancel.is_cancelled() {
            break;
        }

        tracing::info!(
            delay_ms = options.reconnect_delay.as_millis() as u64,
            "Reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(options.reconnect_delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!(url = %options.url, "Session stopped");
}

/// One connection lifecycle: dial, announce, pump frames until close
async fn connect_once(
    shared: &Shared,
    role: &SessionRole,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let connect = tokio_tungstenite::connect_async(options.url.as_str());
    let (ws, _response) = tokio::select! {
        result = connect => result.map_err(|source| SessionError::Connect {
            url: options.url.clone(),
            source,
        })?,
        _ = cancel.cancelled() => return Ok(()),
    };
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(role.announcement().to_json()?))
        .await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound() = Some(tx);
    shared.set_link(LinkState::Open).await;
    tracing::info!(url = %options.url, role = ?role, "Relay connection open");

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                sink.send(Message::Text(frame)).await?;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => shared.ingest(&text).await,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.ingest(&text).await,
                    Err(_) => tracing::debug!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = cancel.cancelled() => {
                // Flush frames queued before close was requested
                while let Ok(frame) = rx.try_recv() {
                    sink.send(Message::Text(frame)).await?;
                }
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Consumer key for a one-shot socket
///
/// Keys are unique per socket so a dashboard registered under
/// `key_prefix` is never superseded.
fn one_shot_key(key_prefix: &str) -> String {
    format!("{}-once-{}", key_prefix, Uuid::new_v4().simple())
}

/// Send one control frame to every device over a short-lived socket
///
/// Dials `url`, announces as a consumer under a fresh key derived from
/// `key_prefix`, sends `frame` and closes. The relay handles frames of a
/// socket in order, so the frame is relayed before the close is seen.
pub async fn send_once(
    url: &str,
    key_prefix: &str,
    frame: &ControlFrame,
    timeout: Duration,
) -> Result<(), SessionError> {
    let key = one_shot_key(key_prefix);
    let announce = ControlFrame::InitConsumer { key: key.clone() }.to_json()?;
    let payload = frame.to_json()?;

    let exchange = async {
        let (mut ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| SessionError::Connect {
                url: url.to_string(),
                source,
            })?;

        ws.send(Message::Text(announce)).await?;
        ws.send(Message::Text(payload)).await?;
        ws.close(None).await?;

        // Frames are already flushed; wait for the relay to hang up
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Socket ended during close");
                    break;
                }
            }
        }

        tracing::debug!(url, key = %key, "One-shot frame delivered");
        Ok::<(), SessionError>(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SessionError::Timeout {
            url: url.to_string(),
            timeout,
        })?
}
