//! Cxtree: cancellation-propagating context trees with immutable key/value
//! storage.
//!
//! # Overview
//!
//! A [`Context`] is one immutable node in a tree. Deriving a child adds
//! key/value data, a deadline, or both, while sharing everything else with
//! its parent. Canceling any node, explicitly via [`Context::cancel`] or
//! implicitly through a [`Context::with_timeout`] deadline, fires a
//! one-shot signal that cascades synchronously to every descendant, so a
//! whole subtree of work can be told to stop with a single call.
//!
//! # Core Guarantees
//!
//! - **One-shot**: a node is canceled at most once; the first reason
//!   ([`CancelReason::Canceled`] or [`CancelReason::Timeout`]) wins and
//!   never changes.
//! - **Complete cascade**: cancellation reaches every descendant, including
//!   children derived after the fact, which are canceled synchronously at
//!   creation instead of dangling live under a dead ancestor.
//! - **Tightest deadline wins**: a node's effective deadline is the
//!   earliest deadline among it and its ancestors; derivation can only
//!   tighten it, never loosen it.
//! - **Structural sharing**: field storage is an immutable chain; deriving
//!   a child never mutates the parent, and lookup resolves the most
//!   recently added entry for a key.
//!
//! # Example
//!
//! ```
//! use cxtree::{CancelReason, Context};
//!
//! let root = Context::new();
//! let ctx = root.with_value("user", "alice");
//!
//! let user = ctx.value(&"user").expect("value present");
//! assert_eq!(user.downcast_ref::<&str>(), Some(&"alice"));
//!
//! ctx.cancel();
//! assert_eq!(ctx.error(), CancelReason::Canceled);
//!
//! // Cancellation never travels upward and data is never shared back.
//! assert!(!root.is_canceled());
//! assert!(root.value(&"user").is_none());
//! ```
//!
//! Observers wait for termination through [`Context::terminated`] (bounded
//! or non-blocking) or [`Context::error`] (blocking):
//!
//! ```
//! use cxtree::{CancelReason, Context};
//! use std::time::Duration;
//!
//! let ctx = Context::new().with_timeout(Duration::from_millis(5));
//! let handle = ctx.terminated();
//! assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(CancelReason::Timeout));
//! ```
//!
//! # Module Structure
//!
//! - [`cancel`]: the two terminal cancellation reasons
//! - [`context`]: the context tree and its derivation operations
//! - [`fields`]: immutable field chains, erased keys and values

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod context;
pub mod fields;

mod signal;
mod time;

pub use cancel::CancelReason;
pub use context::Context;
pub use fields::{FieldChain, FieldValue, Fields, Key};
pub use signal::WaitHandle;
