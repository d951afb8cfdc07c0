//! Stream event records delivered by the transport engine.
//!
//! Each record is a tagged union constructed at the engine boundary and
//! handed to the dispatcher as already-validated data.

use bytes::Bytes;

use crate::error::TransportError;

/// One asynchronous notification for a stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The start request finished. `id` is the transport-assigned stream
    /// id; when `peer_accepted` is false a separate
    /// [`StreamEvent::PeerAccepted`] will follow once the peer admits the
    /// stream.
    StartComplete {
        status: Result<(), TransportError>,
        id: u64,
        peer_accepted: bool,
    },

    /// The peer's stream limit now admits the stream.
    PeerAccepted,

    /// Ordered data arrived. `total_len` is the byte count across
    /// `chunks`; `fin` marks the last delivery of the stream.
    Receive {
        chunks: Vec<Bytes>,
        total_len: usize,
        fin: bool,
    },

    /// The previously submitted send finished. `canceled` means the data
    /// was not (fully) delivered because the send side is being torn
    /// down; a terminal event carries the reason.
    SendComplete { canceled: bool },

    /// The peer gracefully closed its send side; buffered data remains
    /// readable.
    PeerSendShutdown,

    /// The peer reset its send side; reading is over.
    PeerSendAborted { error_code: u64 },

    /// The peer asked us to stop sending; writing is over.
    PeerReceiveAborted { error_code: u64 },

    /// Our send side finished shutting down. Only a graceful completion
    /// settles the write axis here; an abortive one is settled by the
    /// event that caused it.
    SendShutdownComplete { graceful: bool },

    /// The stream is fully shut down; always the last event. When
    /// `connection_shutdown` is set the stream went down with the whole
    /// connection and the remaining fields identify the cause.
    ShutdownComplete {
        connection_shutdown: bool,
        shutdown_by_app: bool,
        closed_remotely: bool,
        status: u64,
        error_code: u64,
    },
}

impl StreamEvent {
    /// Event kind name for logging, without payload bytes.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::StartComplete { .. } => "start_complete",
            StreamEvent::PeerAccepted => "peer_accepted",
            StreamEvent::Receive { .. } => "receive",
            StreamEvent::SendComplete { .. } => "send_complete",
            StreamEvent::PeerSendShutdown => "peer_send_shutdown",
            StreamEvent::PeerSendAborted { .. } => "peer_send_aborted",
            StreamEvent::PeerReceiveAborted { .. } => "peer_receive_aborted",
            StreamEvent::SendShutdownComplete { .. } => "send_shutdown_complete",
            StreamEvent::ShutdownComplete { .. } => "shutdown_complete",
        }
    }
}

/// What the dispatcher tells the engine about a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event consumed.
    Handled,
    /// Receive event consumed: how many offered bytes were accepted and
    /// whether delivery may continue immediately. When `accepted` is
    /// short and `resume` is false the engine must pause delivery until
    /// [`crate::transport::TransportEngine::receive_set_enabled`] is
    /// called.
    Receive { accepted: usize, resume: bool },
    /// The target stream is gone; the event was dropped.
    Dropped,
}
