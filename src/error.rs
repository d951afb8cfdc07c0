//! Stream and transport error types.
//!
//! Two error domains, mirroring the transport boundary:
//! - [`TransportError`]: synchronous status failures returned by the
//!   engine when an operation is submitted.
//! - [`StreamError`]: everything an application-facing operation can
//!   surface, including errors derived from asynchronous events.
//!
//! `StreamError` is `Clone` because one terminal outcome per completion
//! axis is observed by every awaiter of that axis.

use thiserror::Error;

use crate::types::{CloseOrigin, Direction};

pub type Result<T> = std::result::Result<T, StreamError>;

/// Synchronous status returned by a transport engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The operation raced an abort; a terminal stream event carries the
    /// real outcome.
    #[error("operation aborted by the transport")]
    Aborted,
    /// No more concurrent streams can be started right now.
    #[error("stream limit reached")]
    StreamLimitReached,
    /// The handle is not in a state that allows the operation.
    #[error("invalid transport state")]
    InvalidState,
    /// The owning connection is gone.
    #[error("connection closed (status {0})")]
    ConnectionClosed(u64),
    /// Any other engine failure, carrying the raw status code.
    #[error("transport failure (status {0})")]
    Internal(u64),
}

/// Error surfaced by stream operations and closed-axis observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The application aborted this side of the stream.
    #[error("{direction} side aborted locally (error code {error_code})")]
    LocalAbort { direction: Direction, error_code: u64 },

    /// The peer reset this side of the stream.
    #[error("{direction} side aborted by peer (error code {error_code})")]
    PeerAbort { direction: Direction, error_code: u64 },

    /// The owning connection was closed intentionally by an application.
    #[error("connection closed by {origin} application (error code {error_code})")]
    ConnectionClosedByApp { origin: CloseOrigin, error_code: u64 },

    /// The owning connection was closed at the protocol level, e.g. by an
    /// idle timeout or a transport error.
    #[error("connection closed by {origin} transport (status {status}, error code {error_code})")]
    ConnectionClosedByTransport {
        origin: CloseOrigin,
        status: u64,
        error_code: u64,
    },

    /// The stream was shut down before the operation could complete.
    /// Notably the outcome of the start axis when the stream is disposed
    /// without ever having been started.
    #[error("operation aborted")]
    OperationAborted,

    /// The caller's cancellation token fired before completion.
    #[error("operation canceled")]
    OperationCanceled,

    /// The stream has been disposed.
    #[error("stream has been disposed")]
    AlreadyDisposed,

    /// Read on a write-only stream or write on a read-only stream.
    #[error("{0} not allowed on this stream")]
    InvalidDirection(Direction),

    /// A second read or write was issued while one is still outstanding.
    #[error("concurrent {0} operation already in progress")]
    ConcurrentOperation(&'static str),

    /// Abort error code exceeds the varint ceiling.
    #[error("error code must not exceed 2^62-1")]
    ErrorCodeOutOfRange,

    /// A transport operation failed synchronously.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_converts() {
        let err: StreamError = TransportError::StreamLimitReached.into();
        assert_eq!(err, StreamError::Transport(TransportError::StreamLimitReached));
    }

    #[test]
    fn display_carries_error_code() {
        let err = StreamError::LocalAbort {
            direction: Direction::Write,
            error_code: 42,
        };
        let text = err.to_string();
        assert!(text.contains("write"));
        assert!(text.contains("42"));
    }
}
