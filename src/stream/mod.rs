//! The public stream controller.
//!
//! [`Stream`] composes the four completion axes, the receive assembler,
//! the send staging area and the transport binding into one race-free
//! lifecycle. Application calls enter here; transport events enter
//! through the dispatcher (`dispatch.rs`) via the registry. The two flows
//! never share a stream-wide lock: every shared field is either one
//! axis's [`CompletionSlot`], the send lock, or a plain atomic.

mod dispatch;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::buffer::{ReceiveAssembler, SendStaging};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError, TransportError};
use crate::sync::CompletionSlot;
use crate::transport::{
    ConnectionHandle, ShutdownFlags, StartFlags, StreamHandle, StreamRegistry, TransportBinding,
    TransportEngine,
};
use crate::types::{AbortDirection, Direction, StreamId, StreamType, VARINT_MAX};

/// Sentinel for a stream id not yet assigned by the transport.
const ID_UNKNOWN: u64 = u64::MAX;

/// Callback into the parent connection, invoked at most once when the
/// transport accepts the start request.
type CapacityCallback = Box<dyn FnOnce(StreamType) + Send>;

/// State shared between the controller and the event dispatcher.
pub(crate) struct StreamShared {
    binding: TransportBinding,
    stream_type: StreamType,
    can_read: bool,
    can_write: bool,
    default_error_code: u64,

    disposed: AtomicBool,
    id: AtomicU64,

    started: CompletionSlot,
    shutdown_done: CompletionSlot,
    reads: CompletionSlot,
    writes: CompletionSlot,

    recv: ReceiveAssembler,
    recv_needs_enable: AtomicBool,
    send: SendStaging,

    capacity_cb: Mutex<Option<CapacityCallback>>,
}

/// A single bidirectional or unidirectional stream over a shared
/// transport connection.
///
/// All methods take `&self` and are safe to call concurrently with event
/// delivery; at most one read and one write may be outstanding at a time.
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl Stream {
    /// Open a locally-initiated stream on `connection`.
    ///
    /// The stream id is unknown until [`Stream::start`] completes; a
    /// unidirectional stream is write-only for the opener, so its read
    /// axis is settled immediately.
    pub fn open(
        engine: Arc<dyn TransportEngine>,
        registry: Arc<StreamRegistry>,
        connection: ConnectionHandle,
        stream_type: StreamType,
        config: &StreamConfig,
    ) -> Result<Self> {
        let unidirectional = stream_type == StreamType::Unidirectional;
        let binding = TransportBinding::open(engine, Arc::clone(&registry), connection, unidirectional)?;
        let handle = binding.handle();

        let shared = Arc::new(StreamShared {
            binding,
            stream_type,
            can_read: !unidirectional,
            can_write: true,
            default_error_code: config.default_error_code,
            disposed: AtomicBool::new(false),
            id: AtomicU64::new(ID_UNKNOWN),
            started: CompletionSlot::new(),
            shutdown_done: CompletionSlot::new(),
            reads: CompletionSlot::new(),
            writes: CompletionSlot::new(),
            recv: ReceiveAssembler::new(config.receive_buffer_capacity),
            recv_needs_enable: AtomicBool::new(false),
            send: SendStaging::new(),
            capacity_cb: Mutex::new(None),
        });
        if !shared.can_read {
            shared.reads.try_set_result(true);
        }
        registry.register(handle, &shared);

        debug!(handle = handle.0, ?stream_type, "opened local stream");
        Ok(Self { shared })
    }

    /// Bind a peer-initiated stream that the transport has already
    /// accepted: the id is known and the start axis is settled. A
    /// peer-unidirectional stream is read-only on this side.
    pub fn accept(
        engine: Arc<dyn TransportEngine>,
        registry: Arc<StreamRegistry>,
        handle: StreamHandle,
        peer_unidirectional: bool,
        id: u64,
        config: &StreamConfig,
    ) -> Self {
        let binding = TransportBinding::attach(engine, Arc::clone(&registry), handle);
        let stream_type = if peer_unidirectional {
            StreamType::Unidirectional
        } else {
            StreamType::Bidirectional
        };

        let shared = Arc::new(StreamShared {
            binding,
            stream_type,
            can_read: true,
            can_write: !peer_unidirectional,
            default_error_code: config.default_error_code,
            disposed: AtomicBool::new(false),
            id: AtomicU64::new(id),
            started: CompletionSlot::new(),
            shutdown_done: CompletionSlot::new(),
            reads: CompletionSlot::new(),
            writes: CompletionSlot::new(),
            recv: ReceiveAssembler::new(config.receive_buffer_capacity),
            recv_needs_enable: AtomicBool::new(false),
            send: SendStaging::new(),
            capacity_cb: Mutex::new(None),
        });
        if !shared.can_write {
            shared.writes.try_set_result(true);
        }
        shared.started.try_set_result(true);
        registry.register(handle, &shared);

        debug!(handle = handle.0, id, ?stream_type, "accepted peer stream");
        Self { shared }
    }

    /// Stream id, once assigned by the transport.
    pub fn id(&self) -> Option<StreamId> {
        match self.shared.id.load(Ordering::Acquire) {
            ID_UNKNOWN => None,
            id => Some(StreamId(id)),
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.shared.stream_type
    }

    pub fn can_read(&self) -> bool {
        self.shared.can_read
    }

    pub fn can_write(&self) -> bool {
        self.shared.can_write
    }

    /// Transport handle, stable for the lifetime of the stream.
    pub fn handle(&self) -> StreamHandle {
        self.shared.binding.handle()
    }

    /// Resolves once the reading side is closed, gracefully or not.
    pub async fn reads_closed(&self) -> Result<()> {
        self.shared.reads.finished().await
    }

    /// Resolves once the writing side is closed, gracefully or not.
    pub async fn writes_closed(&self) -> Result<()> {
        self.shared.writes.finished().await
    }

    /// Start the stream.
    ///
    /// The start request is always issued, even with an already-canceled
    /// token, so the transport-visible behavior stays consistent; only
    /// the returned awaitable honors cancellation. `decrement_capacity`
    /// is invoked at most once, when the transport accepts the stream.
    pub async fn start(
        &self,
        decrement_capacity: impl FnOnce(StreamType) + Send + 'static,
        token: &CancellationToken,
    ) -> Result<()> {
        let s = &*self.shared;
        if s.disposed.load(Ordering::Acquire) {
            return Err(StreamError::AlreadyDisposed);
        }
        debug_assert!(!s.started.is_completed(), "stream started twice");

        let Some(wait) = s.started.try_arm_with_cancel(token, || {}) else {
            return Err(StreamError::ConcurrentOperation("start"));
        };
        *s.capacity_cb.lock().unwrap() = Some(Box::new(decrement_capacity));

        if let Err(status) =
            s.binding.start(StartFlags::SHUTDOWN_ON_FAIL | StartFlags::INDICATE_PEER_ACCEPT)
        {
            s.capacity_cb.lock().unwrap().take();
            s.started.try_set_error(StreamError::Transport(status), true);
        }
        wait.await
    }

    /// Read into `buf`, waiting for data if none is buffered.
    ///
    /// Returns the number of bytes read; `0` means end of stream, and
    /// every later read keeps returning `0`. Cancellation aborts the
    /// reading side with the configured default error code.
    pub async fn read(&self, buf: &mut [u8], token: &CancellationToken) -> Result<usize> {
        let s = &*self.shared;
        if s.disposed.load(Ordering::Acquire) {
            return Err(StreamError::AlreadyDisposed);
        }
        if !s.can_read {
            return Err(StreamError::InvalidDirection(Direction::Read));
        }
        trace!(capacity = buf.len(), "stream read");

        if s.reads.is_completed() && token.is_cancelled() {
            // Already settled; surface the pre-canceled token without
            // aborting anything.
            return Err(StreamError::OperationCanceled);
        }

        // At most two passes when data is buffered: copy, then consume the
        // immediately-resolved wait. Otherwise the wait suspends until a
        // receive or a terminal event resolves the read axis.
        let mut total = 0;
        loop {
            let Some(wait) =
                s.reads.try_arm_with_cancel(token, || s.cancel_abort(AbortDirection::Read))
            else {
                return Err(StreamError::ConcurrentOperation("read"));
            };

            let (copied, empty, complete) = s.recv.copy_to(&mut buf[total..]);
            total += copied;

            // Settle the axis before the await so it cannot be missed.
            if complete {
                s.reads.try_set_result(true);
            }
            if total > 0 || !empty {
                s.reads.try_set_result(false);
            }

            wait.await?;

            if complete {
                break;
            }
            if total > 0 || total == buf.len() {
                break;
            }
        }

        // Reopen the receive window once the application consumed data.
        if total > 0
            && s.recv_needs_enable
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            s.binding.receive_set_enabled(true)?;
        }

        debug!(bytes = total, "stream read complete");
        Ok(total)
    }

    /// Write `buf`, optionally closing the writing side with it.
    ///
    /// Completes when the transport has taken ownership of the data, not
    /// when the peer acknowledged it. Cancellation aborts the writing
    /// side with the configured default error code.
    pub async fn write(
        &self,
        buf: Bytes,
        complete_writes: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let s = &*self.shared;
        if s.disposed.load(Ordering::Acquire) {
            return Err(StreamError::AlreadyDisposed);
        }
        if !s.can_write {
            return Err(StreamError::InvalidDirection(Direction::Write));
        }
        trace!(len = buf.len(), complete_writes, "stream write");

        if s.writes.is_completed() && token.is_cancelled() {
            return Err(StreamError::OperationCanceled);
        }

        let Some(wait) =
            s.writes.try_arm_with_cancel(token, || s.cancel_abort(AbortDirection::Write))
        else {
            return Err(StreamError::ConcurrentOperation("write"));
        };

        // A terminal outcome is already recorded; deliver it without
        // touching the transport.
        if s.writes.is_completed() {
            return wait.await;
        }

        // An empty write completes immediately and, when asked, closes the
        // writing side gracefully.
        if buf.is_empty() {
            s.writes.try_set_result(false);
            if complete_writes {
                s.complete_writes_inner()?;
            }
            return wait.await;
        }

        // The send lock is normally free here; it is briefly contended by
        // an abort racing us, in which case the stored error reaches the
        // armed wait through the lock holder.
        if s.send.try_acquire() {
            s.send.stage(buf.clone());
            if let Err(status) = s.binding.send(&[buf], complete_writes) {
                // No send-complete event will arrive; release and settle.
                s.send.release();
                if let Some(err) = write_error_for_status(status) {
                    s.send.record_error(err);
                }
                if let Some(err) = s.send.stored_error() {
                    s.writes.try_set_error(err, true);
                }
            }
        }

        wait.await
    }

    /// Abort one or both directions with an application error code.
    ///
    /// Directions that are already settled are skipped; if nothing is
    /// left to abort this is a no-op. Disposed streams ignore aborts.
    pub fn abort(&self, direction: AbortDirection, error_code: u64) -> Result<()> {
        let s = &*self.shared;
        if s.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        if error_code > VARINT_MAX {
            return Err(StreamError::ErrorCodeOutOfRange);
        }
        s.abort_inner(direction, error_code)
    }

    /// Gracefully close the writing side without writing more data.
    ///
    /// The write axis settles when the transport reports the graceful
    /// shutdown complete, not here.
    pub fn complete_writes(&self) -> Result<()> {
        let s = &*self.shared;
        if s.disposed.load(Ordering::Acquire) {
            return Err(StreamError::AlreadyDisposed);
        }
        s.complete_writes_inner()
    }

    /// Tear the stream down and release the transport handle.
    ///
    /// Idempotent and safe to race from multiple tasks: exactly one
    /// caller issues the shutdown requests, and every caller waits for
    /// the terminal shutdown event before the handle is released. A
    /// stream that never started is aborted immediately in both
    /// directions; otherwise a still-open read side is aborted with the
    /// default error code and a still-open write side is closed
    /// gracefully.
    pub async fn dispose(&self) {
        let s = &*self.shared;
        if !s.disposed.swap(true, Ordering::AcqRel) {
            debug!(handle = s.binding.handle().0, "disposing stream");
            if !s.started.is_completed_successfully() {
                s.shutdown_logged(
                    ShutdownFlags::ABORT | ShutdownFlags::IMMEDIATE,
                    s.default_error_code,
                );
            } else {
                if !s.reads.is_completed() {
                    s.shutdown_logged(ShutdownFlags::ABORT_RECEIVE, s.default_error_code);
                }
                if !s.writes.is_completed() {
                    s.shutdown_logged(ShutdownFlags::GRACEFUL, 0);
                }
            }
        }

        // Wait for the terminal event so no transport callback can touch
        // the stream after the handle is gone; losers of the dispose race
        // wait for the same outcome.
        let _ = s.shutdown_done.finished().await;
        s.binding.release();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let s = &*self.shared;
        if !s.disposed.swap(true, Ordering::AcqRel) {
            warn!(handle = s.binding.handle().0, "stream dropped without dispose, aborting");
            let _ = s
                .binding
                .shutdown(ShutdownFlags::ABORT | ShutdownFlags::IMMEDIATE, s.default_error_code);
        }
        s.binding.release();
    }
}

impl StreamShared {
    /// Abort without the dispose/varint checks; shared by the public
    /// abort and the cancellation side effects.
    fn abort_inner(&self, direction: AbortDirection, error_code: u64) -> Result<()> {
        let mut flags = ShutdownFlags::NONE;
        if direction.involves_read() && !self.reads.is_completed() {
            flags |= ShutdownFlags::ABORT_RECEIVE;
        }
        if direction.involves_write() && !self.writes.is_completed() {
            flags |= ShutdownFlags::ABORT_SEND;
        }
        // The targeted sides are already closed.
        if flags.is_empty() {
            return Ok(());
        }

        debug!(?direction, error_code, "aborting stream");
        self.binding.shutdown(flags, error_code)?;

        if direction.involves_read() {
            self.reads.try_set_error(
                StreamError::LocalAbort {
                    direction: Direction::Read,
                    error_code,
                },
                true,
            );
        }
        if direction.involves_write() {
            self.send.record_error(StreamError::LocalAbort {
                direction: Direction::Write,
                error_code,
            });
            // If a send is in flight the lock holder delivers the stored
            // error when it releases; otherwise settle it here.
            if self.send.try_acquire() {
                if let Some(err) = self.send.stored_error() {
                    self.writes.try_set_error(err, true);
                }
                self.send.release();
            }
        }
        Ok(())
    }

    /// Cancellation side effect for read/write waits. Dispose may be
    /// racing on another thread; its path already settles the axis, so
    /// failures here are ignored.
    fn cancel_abort(&self, direction: AbortDirection) {
        if let Err(err) = self.abort_inner(direction, self.default_error_code) {
            debug!(%err, ?direction, "cancellation abort ignored");
        }
        if direction.involves_read() {
            // Wake a reader that is blocked with an empty buffer.
            self.reads.try_set_result(false);
        }
    }

    fn complete_writes_inner(&self) -> Result<()> {
        // Nothing to complete, the writing side is already closed.
        if self.writes.is_completed() {
            return Ok(());
        }
        debug!("completing writes");
        self.binding.shutdown(ShutdownFlags::GRACEFUL, 0)?;
        Ok(())
    }

    /// Shutdown request during dispose: failures are logged, successes
    /// settle the aborted axes locally (the transport's own terminal
    /// events land on already-final slots).
    fn shutdown_logged(&self, flags: ShutdownFlags, error_code: u64) {
        match self.binding.shutdown(flags, error_code) {
            Err(err) => {
                warn!(%err, flags = flags.bits(), "stream shutdown failed");
            }
            Ok(()) => {
                if flags.contains(ShutdownFlags::ABORT_RECEIVE) && !self.reads.is_completed() {
                    self.reads.try_set_error(
                        StreamError::LocalAbort {
                            direction: Direction::Read,
                            error_code,
                        },
                        true,
                    );
                }
                if flags.contains(ShutdownFlags::ABORT_SEND) && !self.writes.is_completed() {
                    self.writes.try_set_error(
                        StreamError::LocalAbort {
                            direction: Direction::Write,
                            error_code,
                        },
                        true,
                    );
                }
            }
        }
    }
}

/// Map a synchronous send failure to the error delivered to the write
/// axis. A transport-side abort produces no error here: one of the
/// terminal events (peer abort, shutdown complete, local abort) carries
/// the real outcome.
fn write_error_for_status(status: TransportError) -> Option<StreamError> {
    match status {
        TransportError::Aborted => None,
        other => Some(StreamError::Transport(other)),
    }
}
