//! Resettable single-awaiter completion cell.
//!
//! Each stream tracks four independent completion axes (started, reads,
//! writes, shutdown) and every axis is one [`CompletionSlot`]. The slot is
//! a versioned one-shot future that can be rearmed across many operations:
//!
//! - At most one awaiter may be outstanding per slot. [`CompletionSlot::try_arm`]
//!   returns `None` when a previous awaitable has not been consumed yet,
//!   which is how nested read/read or write/write calls are rejected.
//! - Non-final completions are wake signals. They may be overwritten and
//!   are consumed by the armed awaiter, which resets the slot to pending
//!   and advances its version for the next operation.
//! - The first completion marked final freezes the slot forever. Later
//!   completion attempts are silent no-ops, which is what makes racing
//!   finalizers (a local abort vs. an asynchronously delivered transport
//!   event) safe without a stream-wide lock.
//! - A waiter dropped before completing disarms only its own version, so
//!   a stale drop can never disturb a slot that has been rearmed since.
//!
//! Cancellation is owned by the armed waiter: the registered side effect
//! runs before the waiter resolves as canceled, and cancellation loses the
//! race once the slot is final.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    /// No outcome recorded.
    Pending,
    /// Non-final success; consumed by the armed awaiter.
    Ready,
    /// Non-final failure; consumed by the armed awaiter.
    Failed(StreamError),
    /// Terminal success.
    FinalReady,
    /// Terminal failure.
    FinalFailed(StreamError),
}

impl SlotState {
    fn is_final(&self) -> bool {
        matches!(self, SlotState::FinalReady | SlotState::FinalFailed(_))
    }
}

struct SlotInner {
    state: SlotState,
    /// Advanced each time an awaiter consumes a completion; waiters and
    /// disarms tied to an old version are inert.
    version: u64,
    /// Whether an awaitable is currently outstanding.
    armed: bool,
    waker: Option<Waker>,
}

/// One completion axis of a stream. See the module docs for the contract.
pub struct CompletionSlot {
    inner: Mutex<SlotInner>,
    /// Wakes [`CompletionSlot::finished`] observers on the first final
    /// completion.
    finalized: Notify,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Pending,
                version: 0,
                armed: false,
                waker: None,
            }),
            finalized: Notify::new(),
        }
    }

    /// Arm an awaitable bound to the current version.
    ///
    /// Returns `None` if an awaitable is already outstanding.
    pub fn try_arm(&self) -> Option<SlotWait<'_>> {
        self.arm(None)
    }

    /// Arm an awaitable with a cancellation hook.
    ///
    /// If `token` fires while the slot is not yet final, `on_cancel` runs
    /// first (typically aborting the direction; it must swallow failures
    /// from a racing dispose) and the awaitable then resolves with
    /// [`StreamError::OperationCanceled`].
    pub fn try_arm_with_cancel<'a>(
        &'a self,
        token: &CancellationToken,
        on_cancel: impl FnOnce() + Send + 'a,
    ) -> Option<SlotWait<'a>> {
        self.arm(Some(CancelHook {
            fired: Box::pin(token.clone().cancelled_owned()),
            action: Box::new(on_cancel),
        }))
    }

    fn arm<'a>(&'a self, cancel: Option<CancelHook<'a>>) -> Option<SlotWait<'a>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.armed {
            return None;
        }
        inner.armed = true;
        Some(SlotWait {
            slot: self,
            version: inner.version,
            finished: false,
            cancel,
        })
    }

    /// Record a success. Returns false if the slot was already final.
    pub fn try_set_result(&self, final_: bool) -> bool {
        self.complete(SlotState::Ready, SlotState::FinalReady, final_)
    }

    /// Record a failure. Returns false if the slot was already final.
    pub fn try_set_error(&self, err: StreamError, final_: bool) -> bool {
        self.complete(SlotState::Failed(err.clone()), SlotState::FinalFailed(err), final_)
    }

    fn complete(&self, transient: SlotState, final_state: SlotState, final_: bool) -> bool {
        let waker = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_final() {
                return false;
            }
            inner.state = if final_ { final_state } else { transient };
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        if final_ {
            self.finalized.notify_waiters();
        }
        true
    }

    /// True once the slot has reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.inner.lock().unwrap().state.is_final()
    }

    /// True once the slot terminated with a success.
    pub fn is_completed_successfully(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, SlotState::FinalReady)
    }

    /// Wait for the terminal outcome. Unlike [`CompletionSlot::try_arm`]
    /// this supports any number of concurrent observers and never consumes
    /// the state.
    pub async fn finished(&self) -> Result<(), StreamError> {
        loop {
            // The notified future must exist before the state check so a
            // finalization between check and await still wakes us.
            let notified = self.finalized.notified();
            {
                let inner = self.inner.lock().unwrap();
                match &inner.state {
                    SlotState::FinalReady => return Ok(()),
                    SlotState::FinalFailed(err) => return Err(err.clone()),
                    _ => {}
                }
            }
            notified.await;
        }
    }
}

impl Default for CompletionSlot {
    fn default() -> Self {
        Self::new()
    }
}

struct CancelHook<'a> {
    fired: Pin<Box<WaitForCancellationFutureOwned>>,
    action: Box<dyn FnOnce() + Send + 'a>,
}

/// The single outstanding awaitable of a [`CompletionSlot`].
pub struct SlotWait<'a> {
    slot: &'a CompletionSlot,
    version: u64,
    finished: bool,
    cancel: Option<CancelHook<'a>>,
}

impl Future for SlotWait<'_> {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(hook) = this.cancel.as_mut() {
            if hook.fired.as_mut().poll(cx).is_ready() {
                let hook = this.cancel.take().expect("cancel hook present");
                // Cancellation wins only while the slot is not final; a
                // settled outcome below takes priority otherwise.
                if !this.slot.is_completed() {
                    (hook.action)();
                    let mut inner = this.slot.inner.lock().unwrap();
                    if inner.version == this.version {
                        inner.armed = false;
                        inner.waker = None;
                    }
                    this.finished = true;
                    return Poll::Ready(Err(StreamError::OperationCanceled));
                }
            }
        }

        let mut inner = this.slot.inner.lock().unwrap();
        debug_assert_eq!(inner.version, this.version, "armed waiter outlived its version");
        match inner.state.clone() {
            SlotState::Pending => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            SlotState::Ready => {
                inner.state = SlotState::Pending;
                inner.version = inner.version.wrapping_add(1);
                inner.armed = false;
                this.finished = true;
                Poll::Ready(Ok(()))
            }
            SlotState::Failed(err) => {
                inner.state = SlotState::Pending;
                inner.version = inner.version.wrapping_add(1);
                inner.armed = false;
                this.finished = true;
                Poll::Ready(Err(err))
            }
            SlotState::FinalReady => {
                inner.version = inner.version.wrapping_add(1);
                inner.armed = false;
                this.finished = true;
                Poll::Ready(Ok(()))
            }
            SlotState::FinalFailed(err) => {
                inner.version = inner.version.wrapping_add(1);
                inner.armed = false;
                this.finished = true;
                Poll::Ready(Err(err))
            }
        }
    }
}

impl Drop for SlotWait<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut inner = self.slot.inner.lock().unwrap();
        // Only disarm our own version; the slot may have been rearmed.
        if inner.version == self.version {
            inner.armed = false;
            inner.waker = None;
        }
    }
}
