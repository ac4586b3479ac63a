//! Process-wide deadline timer driver.
//!
//! Registered deadlines live in a min-heap guarded by one mutex. A single
//! lazily-started worker thread sleeps until the earliest pending deadline,
//! pops everything due, and fires the associated signal cells with
//! `Timeout` after releasing the lock. Released entries are discarded when
//! they surface at the top of the heap, which keeps the driver a single
//! lock plus a condvar.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use crate::cancel::CancelReason;
use crate::signal::SignalCell;

/// Returns the process-wide driver, starting it on first use.
pub(crate) fn driver() -> &'static TimerDriver {
    static DRIVER: OnceLock<TimerDriver> = OnceLock::new();
    DRIVER.get_or_init(TimerDriver::new)
}

/// State shared between a heap entry and the handle that can release it.
struct TimerShared {
    released: AtomicBool,
}

/// Handle to an armed deadline.
///
/// Cloneable; `cancel` is idempotent and a no-op once the deadline fired.
#[derive(Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<TimerShared>,
    driver: &'static TimerDriver,
}

impl TimerHandle {
    /// Releases the armed deadline so it never fires.
    ///
    /// Best effort: an expiry that is already in flight may still win the
    /// race to fire, which the one-shot cell absorbs.
    pub(crate) fn cancel(&self) {
        if !self.shared.released.swap(true, Ordering::AcqRel) {
            trace!("timer released");
            self.driver.wakeup.notify_one();
        }
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    cell: Weak<SignalCell>,
    shared: Arc<TimerShared>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct DriverState {
    queue: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    worker_started: bool,
}

/// The deadline queue and its worker thread.
pub(crate) struct TimerDriver {
    state: Mutex<DriverState>,
    wakeup: Condvar,
}

impl TimerDriver {
    fn new() -> Self {
        Self {
            state: Mutex::new(DriverState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                worker_started: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Arms a deadline that fires `cell` with `Timeout` when it elapses.
    ///
    /// The cell is held weakly: a context dropped before expiry leaves only
    /// an inert entry behind.
    pub(crate) fn register(
        &'static self,
        deadline: Instant,
        cell: Weak<SignalCell>,
    ) -> TimerHandle {
        let shared = Arc::new(TimerShared {
            released: AtomicBool::new(false),
        });

        let mut state = self.state.lock().expect("lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(Entry {
            deadline,
            seq,
            cell,
            shared: Arc::clone(&shared),
        }));
        if !state.worker_started {
            state.worker_started = true;
            thread::Builder::new()
                .name("cxtree-timer".into())
                .spawn(move || self.run())
                .expect("failed to spawn timer thread");
        }
        drop(state);

        self.wakeup.notify_one();
        trace!(timer = seq, "timer armed");
        TimerHandle {
            shared,
            driver: self,
        }
    }

    fn run(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            let now = Instant::now();

            let mut due = Vec::new();
            loop {
                let (released, is_due) = match state.queue.peek() {
                    Some(Reverse(entry)) => (
                        entry.shared.released.load(Ordering::Acquire),
                        entry.deadline <= now,
                    ),
                    None => break,
                };
                if !released && !is_due {
                    break;
                }
                let Some(Reverse(entry)) = state.queue.pop() else {
                    break;
                };
                if !released {
                    due.push(entry);
                }
            }

            if !due.is_empty() {
                // Fire after releasing the lock: the cascade takes signal
                // locks of its own and may release further timers.
                drop(state);
                for entry in due {
                    if let Some(cell) = entry.cell.upgrade() {
                        debug!(timer = entry.seq, "deadline expired");
                        cell.fire(CancelReason::Timeout);
                    }
                }
                state = self.state.lock().expect("lock poisoned");
                continue;
            }

            let sleep = state
                .queue
                .peek()
                .map(|Reverse(next)| next.deadline.saturating_duration_since(now));
            state = match sleep {
                Some(sleep) => {
                    self.wakeup
                        .wait_timeout(state, sleep)
                        .expect("lock poisoned")
                        .0
                }
                None => self.wakeup.wait(state).expect("lock poisoned"),
            };
        }
    }
}
