//! Realtime subscription layer.
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `transport` | `RealtimeTransport` seam + `Subscription` event stream  |
//! | `ws`        | WebSocket transport (handshake, keepalive, frame decode)|
//! | `manager`   | Connection lifecycle, backoff reconnect, action queue   |

pub mod manager;
pub mod transport;
pub mod ws;

pub use manager::{ChannelManager, ConnectionState, Notice, QueuedAction};
pub use transport::{RealtimeTransport, Subscription, TransportEvent};
pub use ws::WsTransport;
