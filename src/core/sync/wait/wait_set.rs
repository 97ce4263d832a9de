/*!
 * Interrupt-Aware Wait Set
 *
 * Condition-variable replacement paired with a `parking_lot::Mutex`. The
 * barrier and the blocking queues keep their multi-field invariants under
 * one mutex and block on a `WaitSet` for "state changed" notifications.
 *
 * # Design: Parking Lot Keyed On The Set
 *
 * Waiters park in the global parking lot under the set's own address.
 * A `parking_lot::Condvar` cannot be woken by a thread interrupt, so
 * interruptible waiters park with their thread id as the park token and
 * record the key on their `ThreadHandle`; `interrupt()` then unparks
 * exactly that thread with an interrupt token.
 *
 * The caller's guard is released before the thread enters the queue. A
 * notification epoch read under the guard and re-checked in the park
 * validation closes that window: a notify that slips in between makes the
 * park return at once as `Notified`.
 *
 * Timeout and notification are settled under the parking lot's bucket
 * lock, so a notification is never consumed by a waiter that then reports
 * `TimedOut`.
 */

use crate::core::sync::config::Fairness;
use crate::core::sync::park;
use parking_lot::MutexGuard;
use parking_lot_core::{FilterOp, ParkResult, ParkToken, UnparkToken};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Park token of waiters that ignore interrupts (thread ids are never 0)
const UNINTERRUPTIBLE: ParkToken = ParkToken(0);
const NOTIFIED: UnparkToken = UnparkToken(1);
const INTERRUPTED: UnparkToken = UnparkToken(2);

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
    Interrupted,
}

/// Result of a wake operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Successfully woke N waiters (N >= 1)
    Woken(usize),
    /// No waiters were waiting
    NoWaiters,
}

impl WakeResult {
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }

    fn from_unparked(unparked: usize) -> Self {
        if unparked == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(unparked)
        }
    }
}

/// FIFO set of threads waiting for a mutex-protected state change
pub struct WaitSet {
    /// Bumped by every notify; parks validate against the value read under the guard
    epoch: AtomicU64,
    /// Threads between registration and return (approximate)
    waiters: AtomicUsize,
    fairness: Fairness,
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitSet {
    pub fn new() -> Self {
        Self::with_fairness(Fairness::NonFair)
    }

    /// A fair wait set hands the caller's mutex directly to a queued locker
    /// when releasing it for the wait.
    pub fn with_fairness(fairness: Fairness) -> Self {
        Self {
            epoch: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
            fairness,
        }
    }

    /// Parking key: stable for as long as any thread can be waiting on `self`
    #[inline(always)]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Wait until notified or interrupted
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) -> WaitOutcome {
        self.block(guard, None, true)
    }

    /// Wait until notified, interrupted, or `deadline` passes
    pub fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant) -> WaitOutcome {
        self.block(guard, Some(deadline), true)
    }

    /// Wait until notified; an interrupt stays pending on the thread
    pub fn wait_uninterruptibly<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.block(guard, None, false);
    }

    fn block<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> WaitOutcome {
        if interruptible && park::interrupted() {
            return WaitOutcome::Interrupted;
        }

        let key = self.key();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let me = park::current();
        let token = if interruptible {
            ParkToken(me.id() as usize)
        } else {
            UNINTERRUPTIBLE
        };

        self.waiters.fetch_add(1, Ordering::Relaxed);
        if interruptible {
            me.set_parked_on(key);
        }

        let park_once = || {
            // SAFETY: `key` is this set's address, which outlives the wait;
            // the callbacks only read atomics and never re-enter the parking lot.
            unsafe {
                parking_lot_core::park(
                    key,
                    || {
                        self.epoch.load(Ordering::SeqCst) == epoch
                            && !(interruptible && me.is_interrupted())
                    },
                    || {},
                    |_, _| {},
                    token,
                    deadline,
                )
            }
        };
        let result = if self.fairness.is_fair() {
            MutexGuard::unlocked_fair(guard, park_once)
        } else {
            MutexGuard::unlocked(guard, park_once)
        };

        if interruptible {
            me.clear_parked_on();
        }
        self.waiters.fetch_sub(1, Ordering::Relaxed);

        match result {
            ParkResult::Unparked(NOTIFIED) => WaitOutcome::Notified,
            ParkResult::Unparked(_) => {
                park::interrupted();
                WaitOutcome::Interrupted
            }
            ParkResult::TimedOut => WaitOutcome::TimedOut,
            // A notify landed before we queued; it wins over a concurrent interrupt.
            ParkResult::Invalid if self.epoch.load(Ordering::SeqCst) != epoch => {
                WaitOutcome::Notified
            }
            ParkResult::Invalid => {
                park::interrupted();
                WaitOutcome::Interrupted
            }
        }
    }

    /// Wake the longest-waiting thread
    pub fn notify_one(&self) -> WakeResult {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // SAFETY: same key as `block`; the callback does not re-enter the parking lot.
        let result = unsafe { parking_lot_core::unpark_one(self.key(), |_| NOTIFIED) };
        WakeResult::from_unparked(result.unparked_threads)
    }

    pub fn notify_all(&self) -> WakeResult {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // SAFETY: same key as `block`.
        let unparked = unsafe { parking_lot_core::unpark_all(self.key(), NOTIFIED) };
        WakeResult::from_unparked(unparked)
    }

    pub fn len(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unpark `thread_id` if it is parked interruptibly on `key`. Called by
/// `ThreadHandle::interrupt` after the interrupt flag is set.
pub(crate) fn unpark_interrupted(key: usize, thread_id: u64) {
    let target = ParkToken(thread_id as usize);
    // SAFETY: the filter and callback only compare tokens.
    unsafe {
        parking_lot_core::unpark_filter(
            key,
            |parked| {
                if parked == target {
                    FilterOp::Unpark
                } else {
                    FilterOp::Skip
                }
            },
            |_| INTERRUPTED,
        );
    }
}
