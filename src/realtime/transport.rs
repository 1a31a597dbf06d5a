//! The transport seam between the channel manager and the wire.
//!
//! A transport multiplexes two logical streams onto one channel: event-row
//! inserts filtered by process id, and state-row updates for that
//! process's record. The manager never talks to a socket directly; it
//! opens a [`Subscription`] and pulls [`TransportEvent`]s from it.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::api::models::{ProcessEvent, ProcessStateRow};
use crate::errors::RealtimeError;

/// One notification pulled off an open subscription.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new event row was inserted for the watched process.
    EventInserted(ProcessEvent),
    /// The process's state row was updated; carries the full row.
    RowUpdated(ProcessStateRow),
    /// The channel closed. The stream ends after this.
    Closed { reason: String },
}

/// Something that can open one live subscription for a process.
///
/// `open` resolves only once the subscribe handshake is confirmed, so a
/// returned subscription is known-live.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(&self, process_id: &str, token: &str) -> Result<Subscription, RealtimeError>;
}

/// A live subscription: a bounded stream of [`TransportEvent`]s plus a
/// shutdown handle. Dropping the subscription closes the channel.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<TransportEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<TransportEvent>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
        }
    }

    /// Next notification, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Tell the transport task to stop. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
