//! Transition handlers for transport events.
//!
//! The single entry point is [`StreamShared::handle_event`], invoked by
//! the registry on the transport's callback context. Events for one
//! stream arrive serialized, but application tasks may be inside read,
//! write, abort or dispose at the same time; every transition below goes
//! through the completion slots, the assembler or the send staging, never
//! a stream-wide lock, so the callback thread is never blocked.

use std::sync::atomic::Ordering;

use tracing::trace;

use super::StreamShared;
use crate::error::{StreamError, TransportError};
use crate::transport::{EventOutcome, StreamEvent};
use crate::types::{CloseOrigin, Direction};
use bytes::Bytes;

impl StreamShared {
    pub(crate) fn handle_event(&self, event: StreamEvent) -> EventOutcome {
        trace!(handle = self.binding.handle().0, event = event.name(), "stream event");
        match event {
            StreamEvent::StartComplete {
                status,
                id,
                peer_accepted,
            } => self.on_start_complete(status, id, peer_accepted),
            StreamEvent::PeerAccepted => self.on_peer_accepted(),
            StreamEvent::Receive {
                chunks,
                total_len,
                fin,
            } => self.on_receive(&chunks, total_len, fin),
            StreamEvent::SendComplete { canceled } => self.on_send_complete(canceled),
            StreamEvent::PeerSendShutdown => self.on_peer_send_shutdown(),
            StreamEvent::PeerSendAborted { error_code } => self.on_peer_send_aborted(error_code),
            StreamEvent::PeerReceiveAborted { error_code } => {
                self.on_peer_receive_aborted(error_code)
            }
            StreamEvent::SendShutdownComplete { graceful } => {
                self.on_send_shutdown_complete(graceful)
            }
            StreamEvent::ShutdownComplete {
                connection_shutdown,
                shutdown_by_app,
                closed_remotely,
                status,
                error_code,
            } => self.on_shutdown_complete(
                connection_shutdown,
                shutdown_by_app,
                closed_remotely,
                status,
                error_code,
            ),
        }
    }

    fn on_start_complete(
        &self,
        status: Result<(), TransportError>,
        id: u64,
        peer_accepted: bool,
    ) -> EventOutcome {
        self.id.store(id, Ordering::Release);
        match status {
            Ok(()) => {
                // The connection's stream budget is consumed exactly once.
                if let Some(decrement) = self.capacity_cb.lock().unwrap().take() {
                    decrement(self.stream_type);
                }
                if peer_accepted {
                    self.started.try_set_result(true);
                }
                // Otherwise PeerAccepted arrives later and settles the axis.
            }
            Err(status) => {
                self.capacity_cb.lock().unwrap().take();
                self.started.try_set_error(StreamError::Transport(status), true);
            }
        }
        EventOutcome::Handled
    }

    fn on_peer_accepted(&self) -> EventOutcome {
        self.started.try_set_result(true);
        EventOutcome::Handled
    }

    fn on_receive(&self, chunks: &[Bytes], total_len: usize, fin: bool) -> EventOutcome {
        let accepted = self.recv.copy_from(chunks, total_len, fin);
        if accepted < total_len {
            self.recv_needs_enable.store(true, Ordering::Release);
        }
        // Wake a blocked reader; the axis stays open.
        self.reads.try_set_result(false);

        // A concurrent read may already have drained the buffer, in which
        // case delivery continues without waiting for the explicit
        // receive-window reopen.
        let resume = self.recv.has_capacity()
            && self
                .recv_needs_enable
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
        EventOutcome::Receive { accepted, resume }
    }

    fn on_send_complete(&self, canceled: bool) -> EventOutcome {
        // The staged buffer is ours again.
        self.send.release();

        // An abort may have stored an error while the send was in flight.
        if let Some(err) = self.send.stored_error() {
            self.writes.try_set_error(err, true);
        }
        if !canceled {
            self.writes.try_set_result(false);
        }
        // A canceled send means the write axis settles through a local
        // abort, a peer receive-abort or the final shutdown event.
        EventOutcome::Handled
    }

    fn on_peer_send_shutdown(&self) -> EventOutcome {
        // Same as a receive with the final flag: no more data will come,
        // but the reader drains the buffer before observing end of stream.
        self.recv.set_final();
        self.reads.try_set_result(false);
        EventOutcome::Handled
    }

    fn on_peer_send_aborted(&self, error_code: u64) -> EventOutcome {
        self.reads.try_set_error(
            StreamError::PeerAbort {
                direction: Direction::Read,
                error_code,
            },
            true,
        );
        EventOutcome::Handled
    }

    fn on_peer_receive_aborted(&self, error_code: u64) -> EventOutcome {
        self.writes.try_set_error(
            StreamError::PeerAbort {
                direction: Direction::Write,
                error_code,
            },
            true,
        );
        EventOutcome::Handled
    }

    fn on_send_shutdown_complete(&self, graceful: bool) -> EventOutcome {
        if graceful {
            self.writes.try_set_result(true);
        }
        // A non-graceful completion is settled by whichever terminal
        // event caused it: local abort, peer receive-abort or the final
        // shutdown event.
        EventOutcome::Handled
    }

    fn on_shutdown_complete(
        &self,
        connection_shutdown: bool,
        shutdown_by_app: bool,
        closed_remotely: bool,
        status: u64,
        error_code: u64,
    ) -> EventOutcome {
        if connection_shutdown {
            let origin = if closed_remotely {
                CloseOrigin::Remote
            } else {
                CloseOrigin::Local
            };
            let err = if shutdown_by_app {
                StreamError::ConnectionClosedByApp { origin, error_code }
            } else {
                StreamError::ConnectionClosedByTransport {
                    origin,
                    status,
                    error_code,
                }
            };
            // One equivalent cause reaches every axis, pending awaiters
            // included; axes that are already final keep their outcome.
            self.started.try_set_error(err.clone(), true);
            self.reads.try_set_error(err.clone(), true);
            self.writes.try_set_error(err, true);
        }

        // A stream that never started has no other completion source left.
        self.started.try_set_error(StreamError::OperationAborted, true);
        self.shutdown_done.try_set_result(true);
        EventOutcome::Handled
    }
}
