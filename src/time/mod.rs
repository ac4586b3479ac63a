//! Deadline timers backing timeout derivation.
//!
//! One process-wide driver owns every armed deadline; expiry fires the
//! registered signal cell with [`CancelReason::Timeout`]. Handles support
//! idempotent early release so a context canceled by other means can let go
//! of its timer promptly.
//!
//! [`CancelReason::Timeout`]: crate::CancelReason::Timeout

mod driver;

pub(crate) use driver::{driver, TimerHandle};
