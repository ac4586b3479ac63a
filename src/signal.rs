//! One-shot cancellation broadcast cells.
//!
//! A [`SignalCell`] holds an optional cancellation reason that is set at most
//! once. Child cells subscribe to a parent cell; when the parent fires, the
//! reason cascades synchronously into every live subscriber. Waiters block on
//! a condvar that is released only after the cascade below the cell has
//! completed, so an observer that wakes up knows its whole subtree is
//! terminated.
//!
//! The cell is the only mutable shared structure in the crate and owns its
//! own lock; nothing else locks on its behalf.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::cancel::CancelReason;

/// Source of process-unique cell identifiers.
static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Hook run exactly once when a cell fires.
///
/// A listener registered after the cell fired is invoked immediately with
/// the stored reason.
pub(crate) trait FireListener: Send + Sync {
    /// Called with the winning reason.
    fn on_fire(&self, reason: CancelReason);
}

impl<F> FireListener for F
where
    F: Fn(CancelReason) + Send + Sync,
{
    fn on_fire(&self, reason: CancelReason) {
        self(reason);
    }
}

/// A live subscription. The cell holds only a weak reference so a dropped
/// child is never kept alive by its parent.
struct Subscriber {
    id: u64,
    cell: Weak<SignalCell>,
}

struct CellState {
    reason: Option<CancelReason>,
    /// Set once the cascade below this cell has completed.
    signaled: bool,
    subscribers: SmallVec<[Subscriber; 4]>,
    listeners: Vec<Box<dyn FireListener>>,
}

/// A one-shot, thread-safe broadcast cell for a cancellation reason.
pub(crate) struct SignalCell {
    id: u64,
    state: Mutex<CellState>,
    fired: Condvar,
}

impl SignalCell {
    /// Creates an unfired cell with no subscribers.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(CellState {
                reason: None,
                signaled: false,
                subscribers: SmallVec::new(),
                listeners: Vec::new(),
            }),
            fired: Condvar::new(),
        })
    }

    /// Process-unique identity of this cell, used to unsubscribe.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Registers `child` to be fired when this cell fires.
    ///
    /// If this cell already fired, `child` is fired immediately and
    /// synchronously with the stored reason instead of being recorded.
    /// Subscribe and fire are serialized by the cell lock, so a
    /// subscription is either replayed or recorded before any future fire,
    /// never both and never neither.
    pub(crate) fn subscribe(&self, child: &Arc<Self>) {
        let replay = {
            let mut state = self.state.lock().expect("lock poisoned");
            match state.reason {
                Some(reason) => Some(reason),
                None => {
                    state.subscribers.push(Subscriber {
                        id: child.id,
                        cell: Arc::downgrade(child),
                    });
                    None
                }
            }
        };
        if let Some(reason) = replay {
            trace!(cell = self.id, child = child.id, "subscribe after fire, replaying");
            child.fire(reason);
        }
    }

    /// Removes a live subscription; no-op when absent or after fire (the
    /// subscriber set is consumed at fire time).
    pub(crate) fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.subscribers.retain(|subscriber| subscriber.id != id);
    }

    /// Registers a fire-time hook, or runs it immediately if already fired.
    pub(crate) fn add_listener(&self, listener: Box<dyn FireListener>) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(reason) = state.reason {
            drop(state);
            listener.on_fire(reason);
        } else {
            state.listeners.push(listener);
        }
    }

    /// Fires the cell with `reason` if it has not fired yet.
    ///
    /// The first caller wins: the reason is recorded, fire listeners run,
    /// and the reason cascades synchronously into every live subscriber
    /// before waiters are released. The cascade recurses one call frame per
    /// tree level below this cell; propagation stays free of any scheduling
    /// machinery, and trees are expected to stay shallow.
    ///
    /// Returns whether this call fired the cell.
    pub(crate) fn fire(&self, reason: CancelReason) -> bool {
        let (subscribers, listeners) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason);
            (
                mem::take(&mut state.subscribers),
                mem::take(&mut state.listeners),
            )
        };

        debug!(cell = self.id, %reason, subscribers = subscribers.len(), "signal fired");

        // Listeners and children run without the lock held so they can
        // re-enter this cell or take their own locks freely.
        for listener in &listeners {
            listener.on_fire(reason);
        }
        for subscriber in subscribers {
            if let Some(child) = subscriber.cell.upgrade() {
                child.fire(reason);
            }
        }

        let mut state = self.state.lock().expect("lock poisoned");
        state.signaled = true;
        drop(state);
        self.fired.notify_all();
        true
    }

    /// The stored reason, or `None` while unfired. Non-blocking.
    pub(crate) fn reason(&self) -> Option<CancelReason> {
        self.state.lock().expect("lock poisoned").reason
    }

    /// Returns true once waiters have been released.
    pub(crate) fn is_signaled(&self) -> bool {
        self.state.lock().expect("lock poisoned").signaled
    }

    /// Blocks until the cell fires and returns the winning reason.
    pub(crate) fn wait(&self) -> CancelReason {
        let mut state = self.state.lock().expect("lock poisoned");
        while !state.signaled {
            state = self.fired.wait(state).expect("lock poisoned");
        }
        state.reason.expect("signaled cell without reason")
    }

    /// Blocks until the cell fires or `timeout` elapses.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = self.state.lock().expect("lock poisoned");
        while !state.signaled {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .fired
                .wait_timeout(state, remaining)
                .expect("lock poisoned")
                .0;
        }
        Some(state.reason.expect("signaled cell without reason"))
    }
}

impl fmt::Debug for SignalCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCell")
            .field("id", &self.id)
            .field("reason", &self.reason())
            .finish()
    }
}

/// Observer handle for a context's termination signal.
///
/// Returned by [`Context::terminated`](crate::Context::terminated). Cheap to
/// clone; all clones observe the same underlying signal. Supports blocking,
/// bounded, and non-blocking queries.
///
/// The handle observes the node, it does not keep it alive: once every
/// `Context` handle to the node is dropped the node is destroyed, and a
/// signal that never fired before that point never will. Hold the `Context`
/// (or use [`wait_timeout`](WaitHandle::wait_timeout)) when that matters.
#[derive(Debug, Clone)]
pub struct WaitHandle {
    cell: Arc<SignalCell>,
}

impl WaitHandle {
    pub(crate) fn new(cell: Arc<SignalCell>) -> Self {
        Self { cell }
    }

    /// Blocks until the context terminates and returns the reason.
    #[must_use]
    pub fn wait(&self) -> CancelReason {
        self.cell.wait()
    }

    /// Blocks until the context terminates or `timeout` elapses.
    ///
    /// Returns `None` when the timeout elapsed first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        self.cell.wait_timeout(timeout)
    }

    /// Returns true once the context has terminated. Non-blocking.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.cell.is_signaled()
    }

    /// The recorded reason, or `None` while the context is live.
    /// Non-blocking.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.cell.reason()
    }
}

#[cfg(test)]
impl SignalCell {
    fn subscriber_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").subscribers.len()
    }
}
