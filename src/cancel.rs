//! Cancellation reasons.
//!
//! A context terminates with exactly one of two reasons: explicit
//! cancellation or deadline expiry. The first reason recorded wins and never
//! changes afterwards; there is no way to "un-cancel" a context.

use thiserror::Error;

/// Why a context was canceled.
///
/// Returned by [`Context::error`](crate::Context::error) and the
/// [`WaitHandle`](crate::WaitHandle) queries once a context terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CancelReason {
    /// The context was canceled explicitly.
    #[error("context cancelled")]
    Canceled,
    /// The context reached its deadline.
    #[error("context timed-out")]
    Timeout,
}

impl CancelReason {
    /// Returns true for explicit cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns true for deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
