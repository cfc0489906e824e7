//! Error taxonomy for the streaming engine.
//!
//! Each concern gets its own enum so callers can tell a dropped frame from a
//! failed turn from a dead connection. Only [`ChannelError`] is ever allowed
//! to end a session's channel.

use std::time::Duration;

use thiserror::Error;

use crate::models::ToolStatus;

/// Connection-level failures. These are the only errors that terminate a
/// channel, and only after the reconnect budget is spent.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The first connection attempt for a session failed.
    #[error("failed to connect to session {session_id}: {reason}")]
    Connect { session_id: String, reason: String },

    /// Every reconnect attempt failed.
    #[error("gave up reconnecting to session {session_id} after {attempts} attempts")]
    RetriesExhausted { session_id: String, attempts: u32 },

    /// A frame could not be written to the socket.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// A frame could not be read from the socket.
    #[error("failed to read frame: {0}")]
    Receive(String),

    /// `send` was called while the channel was not connected.
    #[error("channel is not connected")]
    NotConnected,

    /// The channel task has shut down.
    #[error("channel is closed")]
    Closed,

    /// An outbound event could not be encoded.
    #[error("failed to encode client event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Out-of-order, duplicate, or malformed server events. Always logged and
/// dropped; never surfaced to the user and never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("frame is not a valid server event: {0}")]
    Malformed(String),

    #[error("unknown server event type `{0}`")]
    UnknownEvent(String),

    #[error("`{event}` received with no turn in progress")]
    NoTurnInProgress { event: &'static str },

    #[error("tool_use_id `{0}` was already started")]
    DuplicateToolUse(String),

    #[error("tool_use_id `{0}` was never started")]
    UnknownToolUse(String),

    #[error("tool `{tool_use_id}` cannot move from {from} to {to}")]
    BackwardTransition {
        tool_use_id: String,
        from: ToolStatus,
        to: ToolStatus,
    },
}

/// A failure that aborts the current turn only. The session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The server sent an `error` event.
    #[error("{message}")]
    Server {
        message: String,
        code: Option<String>,
    },

    /// The server could not resume an interrupted stream.
    #[error("stream resume failed: {0}")]
    ResumeFailed(String),

    /// The turn ended while the channel was down and no history was
    /// available to recover it.
    #[error("connection lost before the turn completed")]
    ConnectionLost,

    /// A new turn was requested while one is still streaming.
    #[error("a turn is already in progress")]
    TurnInProgress,
}

/// The server never acknowledged an interrupt request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interrupt was not acknowledged within {}ms; it may not have taken effect", .timeout.as_millis())]
pub struct InterruptTimeout {
    pub message_id: String,
    pub timeout: Duration,
}

/// Local session cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The sessions list and the timestamp map disagree.
    #[error("cache integrity: {0}")]
    Integrity(String),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not valid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine a data directory for the cache")]
    NoDataDir,
}

/// HTTP session API failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("session {0} not found")]
    NotFound(String),
}

/// Failures talking to a running session engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    /// The server does not know the session.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// `answer` named a question that is not pending.
    #[error("no pending question for tool_use_id {0}")]
    NoPendingQuestion(String),

    #[error("session engine has stopped")]
    Stopped,
}
