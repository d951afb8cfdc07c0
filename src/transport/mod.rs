//! Transport engine boundary.
//!
//! The engine performs handshake, framing, encryption and actual byte
//! delivery; this crate consumes it through the narrow operation set
//! below and receives notifications as [`StreamEvent`] records delivered
//! through the [`StreamRegistry`]. Operations are synchronous and
//! status-returning in the style of a native callback API: success means
//! "submitted", and the eventual outcome arrives as an event.

mod event;
mod registry;

pub use event::{EventOutcome, StreamEvent};
pub use registry::StreamRegistry;

use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;

/// Opaque handle to a transport-level connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Opaque handle to a transport-level stream object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Flags for [`TransportEngine::stream_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StartFlags(u32);

impl StartFlags {
    pub const NONE: Self = Self(0);
    /// Shut the stream down automatically if the start fails.
    pub const SHUTDOWN_ON_FAIL: Self = Self(0x4);
    /// Ask for a peer-accepted event when the peer's stream limit admits
    /// the stream later.
    pub const INDICATE_PEER_ACCEPT: Self = Self(0x8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for StartFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StartFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags for [`TransportEngine::stream_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShutdownFlags(u32);

impl ShutdownFlags {
    pub const NONE: Self = Self(0);
    /// Close the send side gracefully; the peer still receives everything
    /// already sent.
    pub const GRACEFUL: Self = Self(0x1);
    /// Abort the send side, discarding unacknowledged data.
    pub const ABORT_SEND: Self = Self(0x2);
    /// Abort the receive side.
    pub const ABORT_RECEIVE: Self = Self(0x4);
    /// Abort both directions.
    pub const ABORT: Self = Self(0x2 | 0x4);
    /// Do not wait for acknowledgements before completing the shutdown.
    pub const IMMEDIATE: Self = Self(0x8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ShutdownFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ShutdownFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The transport engine collaborator.
///
/// Implementations must deliver at most one event at a time per stream
/// (no reentrant dispatch for the same handle), but may do so from any
/// thread and concurrently with application calls on the stream.
pub trait TransportEngine: Send + Sync {
    /// Allocate a stream object bound to a connection.
    fn stream_open(
        &self,
        connection: ConnectionHandle,
        unidirectional: bool,
    ) -> Result<StreamHandle, TransportError>;

    /// Begin the stream; triggers an eventual
    /// [`StreamEvent::StartComplete`].
    fn stream_start(&self, handle: StreamHandle, flags: StartFlags)
        -> Result<(), TransportError>;

    /// Submit a write; triggers an eventual [`StreamEvent::SendComplete`]
    /// unless it fails synchronously.
    fn stream_send(
        &self,
        handle: StreamHandle,
        buffers: &[Bytes],
        fin: bool,
    ) -> Result<(), TransportError>;

    /// Request an abort or graceful close of one or both directions.
    fn stream_shutdown(
        &self,
        handle: StreamHandle,
        flags: ShutdownFlags,
        error_code: u64,
    ) -> Result<(), TransportError>;

    /// Resume receive delivery after a short accept paused it.
    fn receive_set_enabled(
        &self,
        handle: StreamHandle,
        enabled: bool,
    ) -> Result<(), TransportError>;
}

/// Owned handle to the transport-level stream object.
///
/// The binding is the last thing a stream releases: release happens
/// strictly after the shutdown-complete event, which guarantees the
/// engine never dispatches against freed state. Release is idempotent and
/// removes the registry entry exactly once.
pub struct TransportBinding {
    engine: Arc<dyn TransportEngine>,
    registry: Arc<StreamRegistry>,
    handle: StreamHandle,
    released: AtomicBool,
}

impl TransportBinding {
    /// Open a new transport stream and bind it.
    pub(crate) fn open(
        engine: Arc<dyn TransportEngine>,
        registry: Arc<StreamRegistry>,
        connection: ConnectionHandle,
        unidirectional: bool,
    ) -> Result<Self, TransportError> {
        let handle = engine.stream_open(connection, unidirectional)?;
        Ok(Self::attach(engine, registry, handle))
    }

    /// Bind an already-open transport stream (peer-initiated).
    pub(crate) fn attach(
        engine: Arc<dyn TransportEngine>,
        registry: Arc<StreamRegistry>,
        handle: StreamHandle,
    ) -> Self {
        Self {
            engine,
            registry,
            handle,
            released: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub(crate) fn start(&self, flags: StartFlags) -> Result<(), TransportError> {
        self.guard()?;
        self.engine.stream_start(self.handle, flags)
    }

    pub(crate) fn send(&self, buffers: &[Bytes], fin: bool) -> Result<(), TransportError> {
        self.guard()?;
        self.engine.stream_send(self.handle, buffers, fin)
    }

    pub(crate) fn shutdown(
        &self,
        flags: ShutdownFlags,
        error_code: u64,
    ) -> Result<(), TransportError> {
        self.guard()?;
        self.engine.stream_shutdown(self.handle, flags, error_code)
    }

    pub(crate) fn receive_set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.guard()?;
        self.engine.receive_set_enabled(self.handle, enabled)
    }

    /// Release the handle, unregistering the stream from event delivery.
    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.unregister(self.handle);
        }
    }

    fn guard(&self) -> Result<(), TransportError> {
        if self.released.load(Ordering::Acquire) {
            return Err(TransportError::InvalidState);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flags_compose() {
        let mut flags = ShutdownFlags::NONE;
        assert!(flags.is_empty());
        flags |= ShutdownFlags::ABORT_RECEIVE;
        flags |= ShutdownFlags::ABORT_SEND;
        assert_eq!(flags, ShutdownFlags::ABORT);
        assert!(flags.contains(ShutdownFlags::ABORT_SEND));
        assert!(!flags.contains(ShutdownFlags::GRACEFUL));
    }

    #[test]
    fn start_flags_compose() {
        let flags = StartFlags::SHUTDOWN_ON_FAIL | StartFlags::INDICATE_PEER_ACCEPT;
        assert!(flags.contains(StartFlags::SHUTDOWN_ON_FAIL));
        assert!(flags.contains(StartFlags::INDICATE_PEER_ACCEPT));
        assert_eq!(flags.bits(), 0xc);
    }
}
