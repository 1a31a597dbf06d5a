//! Connection lifecycle for one `(process_id, user_id)` pair.
//!
//! A single spawned task owns the subscription, the reconnect timer, and
//! the pending-action queue, multiplexing over the command channel, the
//! transport stream, and the backoff deadline. All connection state lives
//! inside that task; consumers observe it through a `watch` channel and
//! receive data through one bounded [`Notice`] channel.
//!
//! Reconnects are single-flight and bounded: base 1s, doubling, capped at
//! 30s, at most 5 attempts. After that the manager stays disconnected
//! until a manual `connect()`.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::client::GenerationApi;
use crate::api::models::ProcessStateRow;
use crate::errors::ApiError;
use crate::realtime::transport::{RealtimeTransport, Subscription, TransportEvent};

/// Base delay for the exponential backoff schedule.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on a single backoff delay.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Consecutive failed attempts before the manager gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Depth of the notice channel toward the consumer.
const NOTICE_BUFFER: usize = 128;

/// Snapshot of the manager's connection state, published on every
/// transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub queued_actions: usize,
    pub last_error: Option<String>,
}

/// What the manager delivers upward: discrete events, full-row syncs,
/// and connection-level errors, all on one channel.
#[derive(Debug, Clone)]
pub enum Notice {
    Event(crate::api::models::ProcessEvent),
    /// A full-row snapshot. `fetched` distinguishes a manual/initial
    /// fetch from a pushed row update, for diagnostics only.
    RowSync {
        row: ProcessStateRow,
        fetched: bool,
    },
    ConnectionError(String),
}

/// A queued action: re-runnable because a failed drain re-queues it.
pub type QueuedAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

enum Command {
    Connect,
    Disconnect,
    QueueAction { name: String, action: QueuedAction },
    Fetch { reply: oneshot::Sender<Option<ProcessStateRow>> },
}

/// Handle to the manager task.
#[derive(Clone)]
pub struct ChannelManager {
    commands: mpsc::Sender<Command>,
    connection: watch::Receiver<ConnectionState>,
}

impl ChannelManager {
    /// Spawn the manager task. Returns the handle and the notice stream;
    /// the consumer owns the receiving end.
    pub fn spawn(
        transport: Arc<dyn RealtimeTransport>,
        api: Arc<dyn GenerationApi>,
        process_id: Option<String>,
        user_id: Option<String>,
        token: String,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        let task = ManagerTask {
            transport,
            api,
            process_id,
            user_id,
            token,
            notices: notice_tx,
            state: state_tx,
            snapshot: ConnectionState::default(),
            subscription: None,
            queue: Vec::new(),
            manual_disconnect: false,
            reconnect_at: None,
            high_water_sequence: 0,
        };
        tokio::spawn(task.run(command_rx));

        (
            Self {
                commands: command_tx,
                connection: state_rx,
            },
            notice_rx,
        )
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected
    }

    pub async fn connect(&self) {
        let _ = self.commands.send(Command::Connect).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect).await;
    }

    /// Run `action` now if connected, otherwise queue it and trigger a
    /// connection attempt. Queued actions drain FIFO after the next
    /// successful connect; a failed drain re-queues the action.
    pub async fn queue_action(&self, name: impl Into<String>, action: QueuedAction) {
        let _ = self
            .commands
            .send(Command::QueueAction {
                name: name.into(),
                action,
            })
            .await;
    }

    /// One authenticated full-state read. Returns `None` on failure;
    /// the error surfaces through the notice channel.
    pub async fn fetch_process_data(&self) -> Option<ProcessStateRow> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Fetch { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }
}

struct ManagerTask {
    transport: Arc<dyn RealtimeTransport>,
    api: Arc<dyn GenerationApi>,
    process_id: Option<String>,
    user_id: Option<String>,
    token: String,
    notices: mpsc::Sender<Notice>,
    state: watch::Sender<ConnectionState>,
    snapshot: ConnectionState,
    subscription: Option<Subscription>,
    queue: Vec<(String, QueuedAction)>,
    manual_disconnect: bool,
    reconnect_at: Option<Instant>,
    high_water_sequence: i64,
}

enum Wake {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    ReconnectDue,
}

impl ManagerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let wake = {
                let subscription = &mut self.subscription;
                let reconnect_at = self.reconnect_at;
                let next_transport = async {
                    match subscription.as_mut() {
                        Some(sub) => sub.next().await,
                        None => pending().await,
                    }
                };
                let reconnect_due = async {
                    match reconnect_at {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => pending().await,
                    }
                };
                tokio::select! {
                    command = commands.recv() => Wake::Command(command),
                    event = next_transport => Wake::Transport(event),
                    _ = reconnect_due => Wake::ReconnectDue,
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Transport(event) => self.handle_transport(event).await,
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    info!(attempt = self.snapshot.attempts + 1, "reconnecting");
                    self.try_connect().await;
                }
            }
        }
        debug!("manager task stopping: all handles dropped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                // A manual connect restarts the attempt budget.
                self.snapshot.attempts = 0;
                self.reconnect_at = None;
                self.try_connect().await;
            }
            Command::Disconnect => self.disconnect(),
            Command::QueueAction { name, action } => {
                if self.snapshot.is_connected {
                    if let Err(e) = action().await {
                        warn!(action = %name, error = %e, "immediate action failed");
                        self.notify_error(format!("action {name} failed: {e}")).await;
                    }
                } else {
                    debug!(action = %name, "queueing action while disconnected");
                    self.queue.push((name, action));
                    self.snapshot.queued_actions = self.queue.len();
                    self.publish();
                    if !self.snapshot.is_connecting && self.reconnect_at.is_none() {
                        self.try_connect().await;
                    }
                }
            }
            Command::Fetch { reply } => {
                let row = self.fetch().await;
                let _ = reply.send(row);
            }
        }
    }

    async fn handle_transport(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::EventInserted(event)) => {
                // The sequence number is a diagnostics hint only; the
                // reconciler owns dedup and ordering.
                if let Some(sequence) = event.event_sequence {
                    if sequence > self.high_water_sequence {
                        self.high_water_sequence = sequence;
                    } else if sequence > 0 {
                        debug!(
                            sequence,
                            high_water = self.high_water_sequence,
                            "event sequence at or below high-water mark"
                        );
                    }
                }
                let _ = self.notices.send(Notice::Event(event)).await;
            }
            Some(TransportEvent::RowUpdated(row)) => {
                self.snapshot.last_sync_time = Some(Utc::now());
                self.publish();
                let _ = self
                    .notices
                    .send(Notice::RowSync {
                        row,
                        fetched: false,
                    })
                    .await;
            }
            Some(TransportEvent::Closed { reason }) => self.on_channel_closed(reason).await,
            None => self.on_channel_closed("channel closed".to_string()).await,
        }
    }

    async fn on_channel_closed(&mut self, reason: String) {
        self.subscription = None;
        self.snapshot.is_connected = false;
        self.snapshot.last_error = Some(reason.clone());
        self.publish();
        self.notify_error(reason).await;
        if !self.manual_disconnect {
            self.schedule_reconnect();
        }
    }

    /// Guarded connect: a no-op while an attempt is in flight, while a
    /// channel is active, or when either id is missing.
    async fn try_connect(&mut self) {
        if self.snapshot.is_connecting || self.subscription.is_some() {
            debug!("connect skipped: already connecting or connected");
            return;
        }
        let (Some(process_id), Some(_)) = (self.process_id.clone(), self.user_id.as_ref()) else {
            debug!("connect skipped: process id or user id missing");
            return;
        };

        self.manual_disconnect = false;
        self.snapshot.is_connecting = true;
        self.snapshot.last_error = None;
        self.snapshot.attempts += 1;
        self.publish();

        match self.transport.open(&process_id, &self.token).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.snapshot.is_connected = true;
                self.snapshot.is_connecting = false;
                self.snapshot.attempts = 0;
                self.publish();
                info!(process_id = %process_id, "realtime channel connected");

                // Exactly one full-state fetch per (re)connect; events
                // replayed by the transport fill any remaining gap.
                if let Some(row) = self.fetch().await {
                    let _ = self
                        .notices
                        .send(Notice::RowSync { row, fetched: true })
                        .await;
                }
                self.drain_queue().await;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, attempt = self.snapshot.attempts, "connect failed");
                self.snapshot.is_connecting = false;
                self.snapshot.last_error = Some(message.clone());
                self.publish();
                self.notify_error(message).await;
                if !self.manual_disconnect {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.reconnect_at = None;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        self.snapshot.is_connected = false;
        self.snapshot.is_connecting = false;
        self.snapshot.attempts = 0;
        self.publish();
        info!("realtime channel disconnected");
    }

    /// Single-flight, bounded backoff scheduling.
    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            debug!("reconnect already scheduled");
            return;
        }
        if self.snapshot.attempts >= MAX_RECONNECT_ATTEMPTS {
            warn!(
                attempts = self.snapshot.attempts,
                "reconnect attempts exhausted; waiting for manual connect"
            );
            return;
        }
        let delay = backoff_delay(self.snapshot.attempts);
        info!(?delay, attempt = self.snapshot.attempts, "scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn drain_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let pending_actions = std::mem::take(&mut self.queue);
        info!(count = pending_actions.len(), "draining queued actions");
        for (name, action) in pending_actions {
            if let Err(e) = action().await {
                warn!(action = %name, error = %e, "queued action failed; re-queueing");
                self.queue.push((name, action));
            }
        }
        self.snapshot.queued_actions = self.queue.len();
        self.publish();
    }

    async fn fetch(&mut self) -> Option<ProcessStateRow> {
        let process_id = self.process_id.clone()?;
        self.snapshot.is_syncing = true;
        self.publish();

        let result = self.api.fetch_process(&process_id).await;
        self.snapshot.is_syncing = false;

        match result.and_then(|row| self.validate_row(row)) {
            Ok(row) => {
                self.snapshot.last_sync_time = Some(Utc::now());
                self.publish();
                Some(row)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "process fetch failed");
                self.snapshot.last_error = Some(message.clone());
                self.publish();
                self.notify_error(message).await;
                None
            }
        }
    }

    fn validate_row(&self, row: ProcessStateRow) -> Result<ProcessStateRow, ApiError> {
        match (&row.user_id, &self.user_id) {
            (Some(owner), Some(expected)) if owner != expected => Err(ApiError::UserMismatch {
                process_id: row.id.clone(),
            }),
            // A row without an owner is suspicious but not fatal.
            (None, Some(_)) => {
                warn!(process_id = %row.id, "fetched row carries no user id");
                Ok(row)
            }
            _ => Ok(row),
        }
    }

    fn publish(&self) {
        let _ = self.state.send(self.snapshot.clone());
    }

    async fn notify_error(&self, message: String) {
        let _ = self.notices.send(Notice::ConnectionError(message)).await;
    }
}

/// `1s · 2ⁿ`, capped at 30s. `attempts` counts completed failures.
fn backoff_delay(attempts: u32) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempts.saturating_sub(1).min(6));
    RECONNECT_BASE_DELAY
        .saturating_mul(multiplier)
        .min(RECONNECT_MAX_DELAY)
}
