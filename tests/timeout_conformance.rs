//! Deadline and timeout conformance tests.
//!
//! Covers tightest-deadline-wins inheritance, timer-driven cancellation
//! with `Timeout`, the race between explicit cancel and an armed timer,
//! and the deliberate suppression of deadline reporting once any reason
//! has been recorded.

mod common;

use common::{init_test_logging, BOUNDED_WAIT};
use cxtree::{CancelReason, Context};
use std::thread;
use std::time::Duration;

#[test]
fn zero_timeout_fires_timeout_and_values_survive() {
    init_test_logging();
    let root = Context::new();
    let with_user = root.with_value("user", "alice");
    let expiring = with_user.with_timeout(Duration::ZERO);

    assert_eq!(
        expiring.terminated().wait_timeout(BOUNDED_WAIT),
        Some(CancelReason::Timeout)
    );
    assert_eq!(expiring.error(), CancelReason::Timeout);

    let user = expiring.value(&"user").expect("value survives cancellation");
    assert_eq!(user.downcast_ref::<&str>(), Some(&"alice"));
}

#[test]
fn tighter_ancestor_deadline_wins() {
    init_test_logging();
    let root = Context::new();
    let outer = root.with_timeout(Duration::from_secs(10));
    let inner = outer.with_timeout(Duration::from_secs(30));

    let remaining = inner.time_remaining().expect("deadline inherited");
    assert!(remaining <= Duration::from_secs(10));
    assert_eq!(inner.deadline(), outer.deadline());
}

#[test]
fn tighter_request_shortens_the_deadline() {
    init_test_logging();
    let root = Context::new();
    let outer = root.with_timeout(Duration::from_secs(30));
    let inner = outer.with_timeout(Duration::from_millis(100));

    let remaining = inner.time_remaining().expect("deadline present");
    assert!(remaining <= Duration::from_millis(100));

    assert_eq!(
        inner.terminated().wait_timeout(BOUNDED_WAIT),
        Some(CancelReason::Timeout)
    );
    // The outer context keeps running on its own, later deadline.
    assert!(!outer.is_canceled());
}

#[test]
fn inherited_deadline_cascades_from_the_ancestor_timer() {
    init_test_logging();
    let root = Context::new();
    let outer = root.with_timeout(Duration::from_millis(50));
    let inner = outer.with_timeout(Duration::from_secs(30));

    // No timer of its own: the expiry arrives through the ancestor cascade.
    assert_eq!(
        inner.terminated().wait_timeout(BOUNDED_WAIT),
        Some(CancelReason::Timeout)
    );
    assert_eq!(outer.error(), CancelReason::Timeout);
}

#[test]
fn value_children_inherit_the_deadline_unchanged() {
    init_test_logging();
    let root = Context::new();
    let timed = root.with_timeout(Duration::from_millis(50));
    let child = timed.with_value("k", 1u32);

    assert_eq!(child.deadline(), timed.deadline());
    assert_eq!(
        child.terminated().wait_timeout(BOUNDED_WAIT),
        Some(CancelReason::Timeout)
    );
}

#[test]
fn no_deadline_reports_none() {
    init_test_logging();
    let root = Context::new();
    assert!(root.time_remaining().is_none());
    assert!(root.with_value("k", 1u32).time_remaining().is_none());
}

#[test]
fn time_remaining_is_suppressed_once_canceled() {
    init_test_logging();
    let ctx = Context::new().with_timeout(Duration::from_secs(60));
    assert!(ctx.time_remaining().is_some());

    ctx.cancel();

    // Plain cancellation suppresses deadline reporting too, not just
    // timeout expiry.
    assert!(ctx.time_remaining().is_none());
    assert_eq!(ctx.error(), CancelReason::Canceled);
}

#[test]
fn explicit_cancel_beats_a_distant_timer() {
    init_test_logging();
    let ctx = Context::new().with_timeout(Duration::from_secs(60));
    ctx.cancel();

    assert_eq!(ctx.error(), CancelReason::Canceled);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ctx.error(), CancelReason::Canceled);
}

#[test]
fn cancel_racing_the_timer_settles_on_one_reason() {
    init_test_logging();
    for _ in 0..16 {
        let ctx = Context::new().with_timeout(Duration::from_millis(1));
        let racer = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.cancel())
        };
        racer.join().expect("racer panicked");

        let reason = ctx
            .terminated()
            .wait_timeout(BOUNDED_WAIT)
            .expect("terminated");
        assert_eq!(ctx.error(), reason);
        assert!(reason.is_canceled() || reason.is_timeout());
    }
}

#[test]
fn live_context_outlasts_a_bounded_wait() {
    init_test_logging();
    let ctx = Context::new().with_timeout(Duration::from_secs(60));
    let handle = ctx.terminated();

    assert_eq!(handle.wait_timeout(Duration::from_millis(50)), None);
    assert!(!handle.is_terminated());
    assert!(ctx.time_remaining().is_some());
}
