//! Exclusive staging of the single in-flight send.
//!
//! Only one transmit may be outstanding with the transport per stream.
//! The lock flag is held from the moment a write submits until either the
//! submission fails synchronously or the send-complete event arrives; the
//! staged region must stay alive for exactly that window.
//!
//! An abort can race a send that is still in flight. It cannot resolve the
//! write axis itself while the lock is held, so it records a sticky error
//! here; whoever releases the lock next delivers it. The error is never
//! cleared, so every later write observes the same abort state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::StreamError;

pub struct SendStaging {
    locked: AtomicBool,
    staged: Mutex<Option<Bytes>>,
    error: Mutex<Option<StreamError>>,
}

impl SendStaging {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            staged: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    /// Atomically claim the exclusive send lock. Never succeeds twice
    /// without an intervening [`SendStaging::release`].
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Record the buffer region handed to the transport. The lock must be
    /// held by the caller.
    pub fn stage(&self, buffer: Bytes) {
        debug_assert!(self.locked.load(Ordering::Relaxed), "stage without lock");
        *self.staged.lock().unwrap() = Some(buffer);
    }

    /// Clear the staged region and release the lock, returning buffer
    /// ownership to the stream.
    pub fn release(&self) {
        self.staged.lock().unwrap().take();
        self.locked.store(false, Ordering::Release);
    }

    /// Stash a send-direction error; the first error recorded wins and it
    /// is sticky for the remaining lifetime of the stream.
    pub fn record_error(&self, err: StreamError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Read the stashed error without clearing it.
    pub fn stored_error(&self) -> Option<StreamError> {
        self.error.lock().unwrap().clone()
    }
}

impl Default for SendStaging {
    fn default() -> Self {
        Self::new()
    }
}
