//! Hierarchical cancellation contexts.
//!
//! A [`Context`] is one node in a tree. Deriving a child shares the parent's
//! field chain and effective deadline, and subscribes the child's signal
//! cell to the parent's, so canceling any node reaches its whole subtree.
//! Nodes are immutable: derivation allocates, it never mutates.
//!
//! Dropping the last handle to a node unsubscribes it from its parent and
//! releases any armed timer, so a long-lived parent never accumulates
//! subscriptions for children that no longer exist.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::cancel::CancelReason;
use crate::fields::{FieldChain, FieldValue, Fields, Key};
use crate::signal::{SignalCell, WaitHandle};
use crate::time::{driver, TimerHandle};

/// One node in a cancellation/data tree.
///
/// Cheap to clone; clones are handles to the same node. A context is either
/// live or canceled, and the transition happens at most once with the first
/// reason to arrive (`Canceled` or `Timeout`).
///
/// # Examples
///
/// ```
/// use cxtree::{CancelReason, Context};
/// use std::time::Duration;
///
/// let root = Context::new();
/// let ctx = root.with_value("user", "alice");
/// let child = ctx.with_timeout(Duration::from_millis(10));
///
/// // Data and cancellation are independent axes: the timeout fires, and
/// // the inherited value stays readable.
/// assert_eq!(child.error(), CancelReason::Timeout);
/// let user = child.value(&"user").expect("inherited value");
/// assert_eq!(user.downcast_ref::<&str>(), Some(&"alice"));
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    parent: Option<Arc<ContextInner>>,
    fields: FieldChain,
    signal: Arc<SignalCell>,
    deadline: Option<Instant>,
    timer: Option<TimerHandle>,
}

impl Context {
    /// Creates a root context: live, no parent, no fields, no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parent: None,
                fields: FieldChain::new(),
                signal: SignalCell::new(),
                deadline: None,
                timer: None,
            }),
        }
    }

    /// Builds the child node and links its signal cell under this node's.
    ///
    /// Subscribing happens last: if this node is already canceled, the
    /// subscription replays synchronously and the child comes back already
    /// terminated, with any armed timer released by its fire listener.
    fn derive(
        &self,
        fields: FieldChain,
        deadline: Option<Instant>,
        timer: Option<TimerHandle>,
        signal: Arc<SignalCell>,
    ) -> Self {
        let child = Self {
            inner: Arc::new(ContextInner {
                parent: Some(Arc::clone(&self.inner)),
                fields,
                signal,
                deadline,
                timer,
            }),
        };
        self.inner.signal.subscribe(&child.inner.signal);
        child
    }

    /// Returns a child context with `key`/`value` added to the inherited
    /// fields.
    ///
    /// The parent's chain is shared, never copied or mutated; the new pair
    /// shadows any inherited entry with an equal key.
    #[must_use]
    pub fn with_value<K, V>(&self, key: K, value: V) -> Self
    where
        K: Key,
        V: Any + Send + Sync,
    {
        let fields = self.inner.fields.append(key, value);
        self.derive(fields, self.inner.deadline, None, SignalCell::new())
    }

    /// Returns a child context with every pair of `fields` added.
    ///
    /// Pairs are appended in insertion order, so within one batch a later
    /// pair shadows an earlier one with an equal key. Lookup-equivalent to
    /// chaining [`Context::with_value`] over the same pairs.
    #[must_use]
    pub fn with_fields(&self, fields: Fields) -> Self {
        let mut chain = self.inner.fields.clone();
        for (key, value) in fields.into_entries() {
            chain = chain.append_pair(key, value);
        }
        self.derive(chain, self.inner.deadline, None, SignalCell::new())
    }

    /// Returns a child context that is canceled with `Timeout` once
    /// `timeout` elapses, unless canceled earlier.
    ///
    /// Tightest deadline wins: a new timer is armed only when the requested
    /// deadline is strictly earlier than the inherited effective deadline
    /// (or none is inherited). Otherwise the ancestor's deadline is
    /// inherited verbatim and the ancestor's own timer is relied upon, so a
    /// single expiry never has two timers racing for it.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now().checked_add(timeout);
        let inherited = self.inner.deadline;
        let tightened = match (requested, inherited) {
            (Some(requested), Some(inherited)) if requested < inherited => Some(requested),
            (Some(requested), None) => Some(requested),
            _ => None,
        };

        let signal = SignalCell::new();
        let (deadline, timer) = if let Some(deadline) = tightened {
            let handle = driver().register(deadline, Arc::downgrade(&signal));
            // Release the timer as soon as this node fires for any reason.
            let release = handle.clone();
            signal.add_listener(Box::new(move |_reason: CancelReason| release.cancel()));
            (Some(deadline), Some(handle))
        } else {
            trace!("requested deadline not tighter than inherited, no timer armed");
            (inherited, None)
        };

        self.derive(self.inner.fields.clone(), deadline, timer, signal)
    }

    /// Looks up the value for `key`, resolving the most recently added
    /// entry along the path to the root.
    ///
    /// Non-blocking; absence is an expected outcome, not an error.
    #[must_use]
    pub fn value(&self, key: &dyn Key) -> Option<FieldValue> {
        self.inner.fields.lookup(key)
    }

    /// Cancels this context and its whole subtree with
    /// [`CancelReason::Canceled`].
    ///
    /// Any armed timer is released first (best effort; an expiry already in
    /// flight may still win with `Timeout`). No-op on a context that is
    /// already canceled.
    pub fn cancel(&self) {
        if let Some(timer) = &self.inner.timer {
            timer.cancel();
        }
        self.inner.signal.fire(CancelReason::Canceled);
    }

    /// Returns an observer handle for this context's termination signal.
    #[must_use]
    pub fn terminated(&self) -> WaitHandle {
        WaitHandle::new(Arc::clone(&self.inner.signal))
    }

    /// Blocks until this context is canceled and returns the reason.
    ///
    /// Never returns while the context is live; use
    /// [`Context::terminated`] for bounded or non-blocking checks.
    #[must_use]
    pub fn error(&self) -> CancelReason {
        self.inner.signal.wait()
    }

    /// Returns true once a cancellation reason has been recorded.
    /// Non-blocking.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.signal.reason().is_some()
    }

    /// The effective deadline: the earliest deadline among this node and
    /// its ancestors, or `None` when nothing along the path set one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the effective deadline.
    ///
    /// `None` when no effective deadline exists, and also once any
    /// cancellation reason has been recorded: a canceled context reports
    /// no deadline even when it had one. Otherwise the positive gap to the
    /// deadline, or exactly zero when the deadline has passed but the
    /// timer has not fired yet.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        let deadline = self.inner.deadline?;
        if self.inner.signal.reason().is_some() {
            return None;
        }
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("canceled", &self.is_canceled())
            .field("deadline", &self.inner.deadline)
            .field("fields", &self.inner.fields.len())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        if let Some(parent) = &self.parent {
            parent.signal.unsubscribe(self.signal.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_defaults() {
        let root = Context::new();
        assert!(!root.is_canceled());
        assert!(root.deadline().is_none());
        assert!(root.time_remaining().is_none());
        assert!(root.value(&"anything").is_none());
    }

    #[test]
    fn default_matches_new() {
        let root = Context::default();
        assert!(!root.is_canceled());
        assert!(root.deadline().is_none());
    }

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Context>();
        assert_send_sync::<crate::WaitHandle>();
    }

    #[test]
    fn value_derivation_inherits_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(60));
        let child = parent.with_value("k", 1u32);
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn clones_share_the_same_node() {
        let ctx = Context::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_canceled());
        assert_eq!(clone.error(), CancelReason::Canceled);
    }

    #[test]
    fn debug_reports_state() {
        let ctx = Context::new().with_value("k", 1u32);
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("canceled: false"));
        assert!(rendered.contains("fields: 1"));
    }
}
