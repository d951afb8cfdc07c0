//! Synchronization primitives for the stream lifecycle.

mod completion;

pub use completion::{CompletionSlot, SlotWait};
