//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and drives one connection from
//! accept to close: a writer task drains the connection's outbound queue
//! while the reader feeds frames to the relay in receipt order. When the
//! writer fails first the reader is asked to stop and finishes the frame
//! it is relaying.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::relay::Relay;
use crate::api::AppState;

/// Banner served on `GET /` to plain HTTP clients
pub const ROOT_BANNER: &str = "Server is up and running!";

/// WebSocket upgrade handler for `/ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let relay = Arc::clone(&state.relay);
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// `GET /`: devices and dashboards connect to the bare root URL, browsers
/// visiting the server get a banner
pub async fn root_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Some(ws) => {
            let relay = Arc::clone(&state.relay);
            ws.on_upgrade(move |socket| handle_socket(socket, relay))
        }
        None => ROOT_BANNER.into_response(),
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sender, mut receiver) = socket.split();

    // Outbound queue for this connection; fan-out never waits on the socket
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<str>>();

    let connection_id = match relay.registry().open(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting relay connection");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Task to forward queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                tracing::debug!(
                    connection_id = %conn_id_for_send,
                    "WebSocket send failed, closing connection"
                );
                break;
            }
        }
    });

    let stop = CancellationToken::new();

    // Task to receive frames and hand them to the relay one at a time
    let mut recv_task = tokio::spawn({
        let relay = Arc::clone(&relay);
        let connection_id = connection_id.clone();
        let stop = stop.clone();
        async move { read_frames(receiver, &relay, &connection_id, &stop).await }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            stop.cancel();
            if let Err(e) = recv_task.await {
                tracing::warn!(connection_id = %connection_id, error = %e, "Reader task failed");
            }
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    relay.on_close(&connection_id).await;
}

/// Feed frames to the relay until the stream ends, the peer closes, or
/// `stop` fires
///
/// `stop` is only checked between frames; a frame already handed to the
/// relay is always fully relayed.
async fn read_frames<S>(
    mut receiver: S,
    relay: &Relay,
    connection_id: &str,
    stop: &CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                tracing::debug!(connection_id = %connection_id, "Reader stopped");
                break;
            }
            next = receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                if !handle_ws_message(relay, connection_id, msg).await {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => break,
        }
    }
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(relay: &Relay, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            relay.on_message(connection_id, &text).await;
            true
        }
        Message::Binary(bytes) => {
            // Some controller firmware sends JSON in binary frames
            match String::from_utf8(bytes) {
                Ok(text) => {
                    relay.on_message(connection_id, &text).await;
                }
                Err(_) => {
                    tracing::debug!(connection_id = %connection_id, "Dropping non-UTF-8 binary frame");
                }
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Peer requested close");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::registry::ConnectionRegistry;
    use super::super::relay::RelayConfig;
    use super::*;
    use crate::storage::MemoryReadingStore;
    use futures_util::stream;
    use std::time::Duration;

    const TELEMETRY: &str = r#"{"temperature":28.5,"humidity":65,"soilMoisture":500,"lightLevel":300,"rainDrop":1,"pumpStatus":false,"autoMode":true}"#;

    type Inbound = mpsc::UnboundedSender<Result<Message, axum::Error>>;
    type Inbox = mpsc::UnboundedReceiver<Arc<str>>;

    /// Socket-like frame stream fed from a channel
    fn socket() -> (
        Inbound,
        impl Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let frames = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        (tx, Box::pin(frames))
    }

    fn relay() -> Arc<Relay> {
        Arc::new(Relay::new(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(MemoryReadingStore::new()),
            RelayConfig {
                notify_device_online: false,
            },
        ))
    }

    async fn open(relay: &Relay, announce: &str) -> (String, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = relay.registry().open(tx).await.unwrap();
        relay.on_message(&id, announce).await;
        (id, rx)
    }

    async fn consumer(relay: &Relay, key: &str) -> Inbox {
        let announce = format!(r#"{{"type":"init-frontend","frontendId":"{}"}}"#, key);
        open(relay, &announce).await.1
    }

    fn spawn_reader(
        relay: &Arc<Relay>,
        device: &str,
        receiver: impl Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
        stop: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let relay = Arc::clone(relay);
        let device = device.to_string();
        let stop = stop.clone();
        tokio::spawn(async move { read_frames(receiver, &relay, &device, &stop).await })
    }

    #[tokio::test]
    async fn test_reader_stops_on_signal_while_socket_open() {
        let relay = relay();
        let (device, _device_rx) = open(&relay, r#"{"type":"init-esp"}"#).await;
        let mut inbox = consumer(&relay, "a").await;

        let (inbound, receiver) = socket();
        let stop = CancellationToken::new();
        let reader = spawn_reader(&relay, &device, receiver, &stop);

        inbound.send(Ok(Message::Text(TELEMETRY.to_string()))).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*frame, TELEMETRY);

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader ignored stop")
            .unwrap();

        // The stream was dropped with the reader
        assert!(inbound.send(Ok(Message::Text(TELEMETRY.to_string()))).is_err());
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_frames_not_read_after_stop() {
        let relay = relay();
        let (device, _device_rx) = open(&relay, r#"{"type":"init-esp"}"#).await;
        let mut inbox = consumer(&relay, "a").await;

        let (inbound, receiver) = socket();
        inbound.send(Ok(Message::Text(TELEMETRY.to_string()))).unwrap();

        let stop = CancellationToken::new();
        stop.cancel();
        read_frames(receiver, &relay, &device, &stop).await;

        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_never_splits_a_fan_out() {
        for _ in 0..20 {
            let relay = relay();
            let (device, _device_rx) = open(&relay, r#"{"type":"init-esp"}"#).await;
            let mut inboxes = Vec::new();
            for i in 0..50 {
                inboxes.push(consumer(&relay, &format!("c{}", i)).await);
            }

            let (inbound, receiver) = socket();
            inbound.send(Ok(Message::Text(TELEMETRY.to_string()))).unwrap();

            let stop = CancellationToken::new();
            let reader = spawn_reader(&relay, &device, receiver, &stop);
            tokio::task::yield_now().await;
            stop.cancel();
            tokio::time::timeout(Duration::from_secs(5), reader)
                .await
                .unwrap()
                .unwrap();

            let delivered = inboxes
                .iter_mut()
                .map(|inbox| inbox.try_recv())
                .filter(|received| received.is_ok())
                .count();
            assert!(
                delivered == 0 || delivered == 50,
                "frame reached {} of 50 consumers",
                delivered
            );
        }
    }

    #[tokio::test]
    async fn test_close_frame_ends_reader() {
        let relay = relay();
        let (device, _device_rx) = open(&relay, r#"{"type":"init-esp"}"#).await;
        let mut inbox = consumer(&relay, "a").await;

        let (inbound, receiver) = socket();
        inbound.send(Ok(Message::Close(None))).unwrap();
        inbound.send(Ok(Message::Text(TELEMETRY.to_string()))).unwrap();

        let stop = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            read_frames(receiver, &relay, &device, &stop),
        )
        .await
        .unwrap();

        assert!(inbox.try_recv().is_err());
        assert!(!stop.is_cancelled());
    }
}
