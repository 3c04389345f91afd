//! Error types for the MQI client.
//!
//! The variants form a closed set split into two families: errors that
//! leave the session usable (`InvalidState`, `TimeoutExceeded`, `NoQuery`,
//! `NoMoreResults`, `Cancelled`, `QueryException`) and errors that are
//! fatal to the session (`Transport`, `ConnectionClosed`, `MalformedFrame`,
//! `ProtocolViolation`). Session-fatal errors never kill the engine; the
//! host may open a new session on the same engine handle.

use std::io;

use thiserror::Error;

use crate::term::Term;

/// Errors surfaced by the MQI client library.
#[derive(Debug, Error)]
pub enum MqiError {
    /// The engine child could not be spawned, or its handshake output was
    /// absent or malformed within the startup window.
    #[error("failed to launch engine: {0}")]
    LaunchFailed(String),

    /// The engine rejected the shared secret.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Underlying I/O failure; the session becomes broken.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The engine closed the connection before a complete frame arrived.
    #[error("connection closed by engine")]
    ConnectionClosed,

    /// Bytes on the wire did not parse as a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A well-formed frame carried a payload the protocol does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Operation attempted in a state that does not permit it. Recoverable.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The engine reported `time_limit_exceeded`. The session stays usable.
    #[error("query exceeded its time limit")]
    TimeoutExceeded,

    /// The engine reported an uncaught exception raised by the query.
    #[error("query raised an exception: {payload}")]
    QueryException {
        /// The exception term exactly as the engine delivered it.
        payload: Term,
    },

    /// The engine reported `cancel_goal`: the query was cancelled.
    #[error("query was cancelled")]
    Cancelled,

    /// `cancel` or `poll` was issued with no query outstanding.
    #[error("no query is active")]
    NoQuery,

    /// Terminal, non-error end of an async result stream.
    #[error("no more results")]
    NoMoreResults,

    /// The session is broken or closed; open a new one.
    #[error("session is unavailable")]
    SessionUnavailable,
}

impl From<io::Error> for MqiError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => MqiError::ConnectionClosed,
            _ => MqiError::Transport(err),
        }
    }
}

impl MqiError {
    /// True if the error leaves the session usable for further requests.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MqiError::InvalidState(_)
                | MqiError::TimeoutExceeded
                | MqiError::QueryException { .. }
                | MqiError::Cancelled
                | MqiError::NoQuery
                | MqiError::NoMoreResults
        )
    }
}
