//! Mock transport engine for integration tests.
//!
//! Records every submitted operation and can replay events either
//! manually (via [`MockEngine::deliver`]) or synchronously from inside
//! the submitting call, which is how a callback-style engine behaves when
//! an operation completes inline.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use qstream::{
    ConnectionHandle, EventOutcome, ShutdownFlags, StartFlags, StreamConfig, StreamEvent,
    StreamHandle, StreamRegistry, TransportEngine, TransportError,
};

pub const CONN: ConnectionHandle = ConnectionHandle(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Open {
        unidirectional: bool,
    },
    Start {
        handle: u64,
    },
    Send {
        handle: u64,
        len: usize,
        fin: bool,
    },
    Shutdown {
        handle: u64,
        flags: ShutdownFlags,
        error_code: u64,
    },
    ReceiveSetEnabled {
        handle: u64,
        enabled: bool,
    },
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    ops: Vec<Op>,
    fail_start: Option<TransportError>,
    fail_send: Option<TransportError>,
    /// Complete start synchronously from inside `stream_start`.
    auto_start: Option<AutoStart>,
    /// Complete sends synchronously from inside `stream_send`.
    auto_send_complete: bool,
    /// Deliver shutdown events synchronously from inside `stream_shutdown`.
    auto_shutdown: bool,
}

#[derive(Clone, Copy)]
pub struct AutoStart {
    pub id: u64,
    pub peer_accepted: bool,
}

pub struct MockEngine {
    registry: Arc<StreamRegistry>,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new(registry: Arc<StreamRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            state: Mutex::new(MockState {
                next_handle: 10,
                ..MockState::default()
            }),
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn shutdown_ops(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, Op::Shutdown { .. }))
            .collect()
    }

    pub fn fail_start_with(&self, err: TransportError) {
        self.state.lock().unwrap().fail_start = Some(err);
    }

    pub fn fail_send_with(&self, err: TransportError) {
        self.state.lock().unwrap().fail_send = Some(err);
    }

    pub fn auto_start(&self, id: u64) {
        self.state.lock().unwrap().auto_start = Some(AutoStart {
            id,
            peer_accepted: true,
        });
    }

    pub fn auto_send_complete(&self) {
        self.state.lock().unwrap().auto_send_complete = true;
    }

    pub fn auto_shutdown(&self) {
        self.state.lock().unwrap().auto_shutdown = true;
    }

    pub fn deliver(&self, handle: StreamHandle, event: StreamEvent) -> EventOutcome {
        self.registry.dispatch(handle, event)
    }
}

impl TransportEngine for MockEngine {
    fn stream_open(
        &self,
        _connection: ConnectionHandle,
        unidirectional: bool,
    ) -> Result<StreamHandle, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.ops.push(Op::Open { unidirectional });
        Ok(StreamHandle(handle))
    }

    fn stream_start(
        &self,
        handle: StreamHandle,
        _flags: StartFlags,
    ) -> Result<(), TransportError> {
        let auto = {
            let mut state = self.state.lock().unwrap();
            state.ops.push(Op::Start { handle: handle.0 });
            if let Some(err) = state.fail_start {
                return Err(err);
            }
            state.auto_start
        };
        if let Some(AutoStart { id, peer_accepted }) = auto {
            self.registry.dispatch(
                handle,
                StreamEvent::StartComplete {
                    status: Ok(()),
                    id,
                    peer_accepted,
                },
            );
        }
        Ok(())
    }

    fn stream_send(
        &self,
        handle: StreamHandle,
        buffers: &[Bytes],
        fin: bool,
    ) -> Result<(), TransportError> {
        let auto = {
            let mut state = self.state.lock().unwrap();
            let len = buffers.iter().map(Bytes::len).sum();
            state.ops.push(Op::Send {
                handle: handle.0,
                len,
                fin,
            });
            if let Some(err) = state.fail_send {
                return Err(err);
            }
            state.auto_send_complete
        };
        if auto {
            self.registry
                .dispatch(handle, StreamEvent::SendComplete { canceled: false });
        }
        Ok(())
    }

    fn stream_shutdown(
        &self,
        handle: StreamHandle,
        flags: ShutdownFlags,
        error_code: u64,
    ) -> Result<(), TransportError> {
        let auto = {
            let mut state = self.state.lock().unwrap();
            state.ops.push(Op::Shutdown {
                handle: handle.0,
                flags,
                error_code,
            });
            state.auto_shutdown
        };
        if auto {
            if flags.contains(ShutdownFlags::GRACEFUL) {
                self.registry
                    .dispatch(handle, StreamEvent::SendShutdownComplete { graceful: true });
            }
            if flags.contains(ShutdownFlags::ABORT_SEND) {
                self.registry
                    .dispatch(handle, StreamEvent::SendShutdownComplete { graceful: false });
            }
            self.registry.dispatch(handle, stream_shutdown_complete());
        }
        Ok(())
    }

    fn receive_set_enabled(
        &self,
        handle: StreamHandle,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.state.lock().unwrap().ops.push(Op::ReceiveSetEnabled {
            handle: handle.0,
            enabled,
        });
        Ok(())
    }
}

/// Fresh registry, engine and default config.
pub fn setup() -> (Arc<StreamRegistry>, Arc<MockEngine>, StreamConfig) {
    let registry = StreamRegistry::new();
    let engine = MockEngine::new(Arc::clone(&registry));
    (registry, engine, StreamConfig::default())
}

pub fn receive_event(data: &[u8], fin: bool) -> StreamEvent {
    StreamEvent::Receive {
        chunks: vec![Bytes::copy_from_slice(data)],
        total_len: data.len(),
        fin,
    }
}

/// Shutdown-complete for a plain stream teardown (connection stays up).
pub fn stream_shutdown_complete() -> StreamEvent {
    StreamEvent::ShutdownComplete {
        connection_shutdown: false,
        shutdown_by_app: false,
        closed_remotely: false,
        status: 0,
        error_code: 0,
    }
}
