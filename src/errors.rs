//! Typed error hierarchy for the sync engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `ApiError` — HTTP fetch/submit failures and payload validation
//! - `RealtimeError` — subscription transport failures
//! - `ActionError` — user-decision action failures (carry rollback context)

use thiserror::Error;

/// Errors from the HTTP API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request to {endpoint} failed: {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} for {endpoint}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response from {endpoint}: {source}")]
    DecodeFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Process {process_id} belongs to another user")]
    UserMismatch { process_id: String },

    #[error("Process id is required")]
    MissingProcessId,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the realtime subscription transport.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("WebSocket connect to {url} failed: {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Subscribe handshake timed out after {seconds}s")]
    SubscribeTimeout { seconds: u64 },

    #[error("Subscribe rejected: {0}")]
    SubscribeRejected(String),

    #[error("Channel closed by server")]
    ChannelClosed,

    #[error("Heartbeat lost: no pong within {seconds}s")]
    HeartbeatLost { seconds: u64 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from user-decision actions and pipeline control operations.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Not connected to the generation process")]
    NotConnected,

    #[error("Submission of {input_type} failed: {source}")]
    SubmitFailed {
        input_type: String,
        #[source]
        source: ApiError,
    },

    #[error("Control operation {operation} failed: {source}")]
    ControlFailed {
        operation: String,
        #[source]
        source: ApiError,
    },

    #[error("Engine is shutting down")]
    EngineClosed,

    #[error(transparent)]
    Api(#[from] ApiError),
}
