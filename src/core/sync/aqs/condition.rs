/*!
 * Condition Objects
 *
 * Wait sets attached to an exclusive synchronizer. A holder releases its
 * full state and parks on the condition; a signal moves it back onto the
 * synchronizer's main queue, where it re-acquires the saved state before
 * `await_` returns.
 *
 * The condition queue is only touched by the exclusive holder, so a plain
 * mutex around it never contends.
 */

use super::node::{Mode, Node, WaitStatus};
use super::policy::ExclusivePolicy;
use super::synchronizer::QueuedSynchronizer;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::SPIN_FOR_TIMEOUT_THRESHOLD;
use crate::core::sync::park::{self, ThreadHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to do about an interrupt seen during a condition wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptMode {
    None,
    /// Interrupted after a signal: return normally with the flag set
    Reinterrupt,
    /// Interrupted before a signal: report `Interrupted`
    Throw,
}

/// Condition bound to one exclusive synchronizer. Cloning yields another
/// handle to the same wait set.
pub struct ConditionObject<P> {
    sync: Arc<QueuedSynchronizer<P>>,
    waiters: Arc<Mutex<VecDeque<Arc<Node>>>>,
}

impl<P> Clone for ConditionObject<P> {
    fn clone(&self) -> Self {
        Self {
            sync: Arc::clone(&self.sync),
            waiters: Arc::clone(&self.waiters),
        }
    }
}

impl<P: ExclusivePolicy> ConditionObject<P> {
    pub fn new(sync: Arc<QueuedSynchronizer<P>>) -> Self {
        Self {
            sync,
            waiters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Whether this condition was created by `sync`
    pub fn is_owned_by(&self, sync: &Arc<QueuedSynchronizer<P>>) -> bool {
        Arc::ptr_eq(&self.sync, sync)
    }

    fn ensure_held(&self) -> SyncResult<()> {
        if self.sync.is_held_exclusively() {
            Ok(())
        } else {
            Err(SyncError::illegal_state(
                "current thread does not hold the lock",
            ))
        }
    }

    fn add_condition_waiter(&self) -> Arc<Node> {
        let mut waiters = self.waiters.lock();
        if waiters
            .back()
            .map_or(false, |last| last.status() != WaitStatus::Condition)
        {
            waiters.retain(|node| node.status() == WaitStatus::Condition);
        }
        let node = Arc::new(Node::new(
            park::current(),
            Mode::Exclusive,
            WaitStatus::Condition,
        ));
        waiters.push_back(Arc::clone(&node));
        node
    }

    fn unlink_cancelled_waiters(&self) {
        self.waiters
            .lock()
            .retain(|node| node.status() == WaitStatus::Condition);
    }

    fn check_interrupt_while_waiting(&self, node: &Arc<Node>) -> InterruptMode {
        if !park::interrupted() {
            InterruptMode::None
        } else if self.sync.transfer_after_cancelled_wait(node) {
            InterruptMode::Throw
        } else {
            InterruptMode::Reinterrupt
        }
    }

    /// Re-acquire after the wait and settle the interrupt outcome
    fn finish_wait(&self, node: &Arc<Node>, saved: i64, mut mode: InterruptMode) -> SyncResult<()> {
        if self.sync.acquire_queued(node, saved) && mode != InterruptMode::Throw {
            mode = InterruptMode::Reinterrupt;
        }
        if mode != InterruptMode::None {
            self.unlink_cancelled_waiters();
        }
        match mode {
            InterruptMode::Throw => Err(SyncError::Interrupted),
            InterruptMode::Reinterrupt => {
                park::self_interrupt();
                Ok(())
            }
            InterruptMode::None => Ok(()),
        }
    }

    /// Release the lock and wait for a signal or interrupt, re-acquiring the
    /// lock (with its full hold count) before returning either way.
    pub fn await_(&self) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.ensure_held()?;

        let node = self.add_condition_waiter();
        let saved = self.sync.fully_release(&node)?;
        let mut mode = InterruptMode::None;
        while !self.sync.is_on_sync_queue(&node) {
            park::park();
            mode = self.check_interrupt_while_waiting(&node);
            if mode != InterruptMode::None {
                break;
            }
        }
        self.finish_wait(&node, saved, mode)
    }

    /// Wait for a signal; interrupts are remembered and re-asserted on return
    pub fn await_uninterruptibly(&self) -> SyncResult<()> {
        self.ensure_held()?;

        let node = self.add_condition_waiter();
        let saved = self.sync.fully_release(&node)?;
        let mut interrupted = false;
        while !self.sync.is_on_sync_queue(&node) {
            park::park();
            if park::interrupted() {
                interrupted = true;
            }
        }
        if self.sync.acquire_queued(&node, saved) || interrupted {
            park::self_interrupt();
        }
        Ok(())
    }

    /// Wait with a bound. `Ok(false)` if the timeout elapsed before a signal.
    pub fn await_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.await_until(park::deadline_after(timeout))
    }

    /// Wait until `deadline`. `Ok(false)` if it passed before a signal.
    pub fn await_until(&self, deadline: Instant) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.ensure_held()?;

        let node = self.add_condition_waiter();
        let saved = self.sync.fully_release(&node)?;
        let mut timed_out = false;
        let mut mode = InterruptMode::None;
        while !self.sync.is_on_sync_queue(&node) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = self.sync.transfer_after_cancelled_wait(&node);
                break;
            }
            if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                park::park_timeout(remaining);
            }
            mode = self.check_interrupt_while_waiting(&node);
            if mode != InterruptMode::None {
                break;
            }
        }
        if timed_out {
            // The node left the condition queue on its own; drop it from the wait set.
            self.unlink_cancelled_waiters();
        }
        self.finish_wait(&node, saved, mode)?;
        Ok(!timed_out)
    }

    /// Move the longest-waiting thread back to the lock's queue
    pub fn signal(&self) -> SyncResult<()> {
        self.ensure_held()?;
        loop {
            let first = self.waiters.lock().pop_front();
            match first {
                Some(node) => {
                    if self.sync.transfer_for_signal(&node) {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Move every waiting thread back to the lock's queue
    pub fn signal_all(&self) -> SyncResult<()> {
        self.ensure_held()?;
        let drained: Vec<_> = self.waiters.lock().drain(..).collect();
        for node in &drained {
            self.sync.transfer_for_signal(node);
        }
        Ok(())
    }

    pub fn has_waiters(&self) -> SyncResult<bool> {
        self.ensure_held()?;
        Ok(self
            .waiters
            .lock()
            .iter()
            .any(|node| node.status() == WaitStatus::Condition))
    }

    pub fn wait_queue_length(&self) -> SyncResult<usize> {
        self.ensure_held()?;
        Ok(self
            .waiters
            .lock()
            .iter()
            .filter(|node| node.status() == WaitStatus::Condition)
            .count())
    }

    pub fn waiting_threads(&self) -> SyncResult<Vec<ThreadHandle>> {
        self.ensure_held()?;
        Ok(self
            .waiters
            .lock()
            .iter()
            .filter(|node| node.status() == WaitStatus::Condition)
            .filter_map(|node| node.waiting_thread().cloned())
            .collect())
    }
}

impl<P> fmt::Debug for ConditionObject<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionObject")
            .field("waiters", &self.waiters.lock().len())
            .finish()
    }
}
