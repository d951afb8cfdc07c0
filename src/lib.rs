//! qstream: per-stream I/O state machine for an event-driven QUIC transport.
//!
//! This crate implements the application-facing side of a single QUIC
//! stream (RFC 9000 Section 2): an ordered, flow-controlled byte channel
//! multiplexed over a shared connection. The transport engine itself
//! (handshake, congestion control, packet protection, delivery) sits
//! behind the [`transport::TransportEngine`] trait; this crate turns its
//! callback-style events and the application's read/write/abort/dispose
//! calls into one consistent lifecycle.
//!
//! # Architecture
//!
//! - **No stream-wide lock**: application tasks and the transport's
//!   callback thread race freely. Every shared field is one completion
//!   axis's versioned slot, the exclusive send lock, or a plain atomic.
//! - **Four completion axes** per stream (started, reads, writes,
//!   shutdown), each a [`sync::CompletionSlot`] where the first final
//!   completion wins and later ones are no-ops.
//! - **Weak event routing**: the engine addresses streams by stable
//!   handle through a [`transport::StreamRegistry`]; events for a
//!   disposed stream are dropped, never delivered to freed state.
//!
//! # Module Organization
//!
//! - `sync`: the resettable completion primitive
//! - `buffer`: receive assembly and send staging
//! - `transport`: engine trait, events, handle registry
//! - `stream`: the public [`Stream`] controller and event dispatcher
//! - `config`, `error`, `types`: ambient stream vocabulary

#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod stream;
pub mod sync;
pub mod transport;
pub mod types;

pub use config::StreamConfig;
pub use error::{Result, StreamError, TransportError};
pub use stream::Stream;
pub use transport::{
    ConnectionHandle, EventOutcome, ShutdownFlags, StartFlags, StreamEvent, StreamHandle,
    StreamRegistry, TransportEngine,
};
pub use types::{AbortDirection, CloseOrigin, Direction, StreamId, StreamType};
