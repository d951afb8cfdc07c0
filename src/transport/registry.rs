//! Handle-to-stream event routing with liveness checks.
//!
//! The engine holds only a stable integer handle per stream, never a
//! pointer. Every dispatch looks the handle up and upgrades a weak
//! reference; if the stream has already been torn down the event is
//! dropped instead of touching freed state. Entries are removed exactly
//! once, during dispose.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use super::event::{EventOutcome, StreamEvent};
use super::StreamHandle;
use crate::stream::StreamShared;

pub struct StreamRegistry {
    entries: Mutex<HashMap<u64, Weak<StreamShared>>>,
}

impl StreamRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn register(&self, handle: StreamHandle, shared: &Arc<StreamShared>) {
        let previous = self
            .entries
            .lock()
            .unwrap()
            .insert(handle.0, Arc::downgrade(shared));
        debug_assert!(previous.is_none(), "handle registered twice");
    }

    pub(crate) fn unregister(&self, handle: StreamHandle) -> bool {
        self.entries.lock().unwrap().remove(&handle.0).is_some()
    }

    /// Route one event to the stream owning `handle`.
    ///
    /// The engine must call this serially per stream; different streams
    /// may be dispatched concurrently.
    pub fn dispatch(&self, handle: StreamHandle, event: StreamEvent) -> EventOutcome {
        let target = {
            let entries = self.entries.lock().unwrap();
            entries.get(&handle.0).and_then(Weak::upgrade)
        };
        match target {
            Some(shared) => shared.handle_event(event),
            None => {
                trace!(handle = handle.0, event = event.name(), "event for dead stream dropped");
                EventOutcome::Dropped
            }
        }
    }

    /// Number of live registrations, for diagnostics.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
