//! WebSocket transport.
//!
//! Wire protocol: JSON text frames tagged by `type`, content under
//! `data`. The client opens the socket with the bearer token attached,
//! sends one `subscribe` frame, and waits for the `subscribed`
//! confirmation before the subscription is considered live. A ping is
//! sent every 30s; 60s of pong silence closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::api::models::{ProcessEvent, ProcessStateRow};
use crate::errors::RealtimeError;
use crate::realtime::transport::{RealtimeTransport, Subscription, TransportEvent};

/// How long to wait for the `subscribed` confirmation.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the
/// connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Depth of the subscription's event buffer.
const EVENT_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ── Wire frames ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { process_id: String, token: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerFrame {
    Subscribed {
        #[serde(default)]
        process_id: Option<String>,
    },
    EventInserted {
        event: ProcessEvent,
    },
    RowUpdated {
        row: ProcessStateRow,
    },
    Error {
        message: String,
    },
}

// ── Transport ────────────────────────────────────────────────────────

/// [`RealtimeTransport`] over `tokio-tungstenite`.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn open(&self, process_id: &str, token: &str) -> Result<Subscription, RealtimeError> {
        let mut request =
            self.url
                .as_str()
                .into_client_request()
                .map_err(|e| RealtimeError::ConnectFailed {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
        let bearer =
            format!("Bearer {token}")
                .parse()
                .map_err(|_| RealtimeError::ConnectFailed {
                    url: self.url.clone(),
                    message: "token is not a valid header value".to_string(),
                })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) =
            connect_async(request)
                .await
                .map_err(|e| RealtimeError::ConnectFailed {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
        let (mut sink, mut stream) = socket.split();

        let subscribe = ClientFrame::Subscribe {
            process_id: process_id.to_string(),
            token: token.to_string(),
        };
        let frame = serde_json::to_string(&subscribe)
            .map_err(|e| RealtimeError::MalformedFrame(e.to_string()))?;
        sink.send(Message::Text(frame))
            .await
            .map_err(|e| RealtimeError::ConnectFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        await_subscribed(&mut stream).await?;
        info!(process_id, url = %self.url, "realtime channel subscribed");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_socket_loop(sink, stream, event_tx, shutdown_rx));
        Ok(Subscription::new(event_rx, shutdown_tx))
    }
}

/// Wait for the `subscribed` confirmation, bounded by [`JOIN_TIMEOUT`].
async fn await_subscribed(stream: &mut WsStream) -> Result<(), RealtimeError> {
    let deadline = Instant::now() + JOIN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = tokio::time::timeout(remaining, stream.next())
            .await
            .map_err(|_| RealtimeError::SubscribeTimeout {
                seconds: JOIN_TIMEOUT.as_secs(),
            })?;
        match message {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(ServerFrame::Subscribed { .. }) => return Ok(()),
                Ok(ServerFrame::Error { message }) => {
                    return Err(RealtimeError::SubscribeRejected(message));
                }
                // Replayed data frames can arrive before the ack on
                // reconnect; they are redelivered after subscribe, so
                // skipping them here loses nothing.
                Ok(_) => continue,
                Err(e) => return Err(RealtimeError::MalformedFrame(e.to_string())),
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(RealtimeError::ChannelClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RealtimeError::ConnectFailed {
                    url: String::new(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Core socket loop with ping/pong keepalive.
///
/// Forwards decoded frames to the subscription until the server closes,
/// the keepalive lapses, or the subscription's shutdown fires. Always
/// emits a final `Closed` event (except on local shutdown) so the
/// manager can tell a remote close from a manual disconnect.
async fn run_socket_loop(
    mut sink: WsSink,
    mut stream: WsStream,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("socket loop stopping on local shutdown");
                let _ = sink.send(Message::Close(None)).await;
                return;
            }

            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break RealtimeError::HeartbeatLost {
                        seconds: PONG_TIMEOUT.as_secs(),
                    }
                    .to_string();
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break "ping send failed".to_string();
                }
                awaiting_pong = true;
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text) {
                            if events.send(event).await.is_err() {
                                // Subscription dropped without a shutdown
                                // signal; nothing left to deliver to.
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break "pong send failed".to_string();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break RealtimeError::ChannelClosed.to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                }
            }
        }
    };

    warn!(%reason, "realtime channel closed");
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

fn decode_frame(text: &str) -> Option<TransportEvent> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::EventInserted { event }) => Some(TransportEvent::EventInserted(event)),
        Ok(ServerFrame::RowUpdated { row }) => Some(TransportEvent::RowUpdated(row)),
        Ok(ServerFrame::Subscribed { .. }) => {
            debug!("ignoring duplicate subscribed frame");
            None
        }
        Ok(ServerFrame::Error { message }) => {
            warn!(%message, "server error frame");
            None
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}
