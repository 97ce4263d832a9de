/*!
 * Reentrant Lock
 *
 * Exclusive lock whose state word is the owner's hold count. The owning
 * thread may re-acquire without contention; the lock is released when the
 * count returns to zero.
 *
 * # Fairness
 *
 * Non-fair locks try a direct CAS before queueing, even when threads are
 * waiting. Fair locks only take a free lock when no thread has been queued
 * longer than the caller. `try_lock` barges in both modes.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::aqs::{ConditionObject, ExclusivePolicy, QueuedSynchronizer};
use crate::core::sync::config::Fairness;
use crate::core::sync::park::{self, ThreadHandle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Condition variable created by [`ReentrantLock::new_condition`]
pub type Condition = ConditionObject<LockPolicy>;

/// Hold-count policy behind [`ReentrantLock`]
#[derive(Debug)]
pub struct LockPolicy {
    fairness: Fairness,
}

impl LockPolicy {
    /// Non-fair acquire: take a free lock regardless of queued threads
    fn barge(&self, sync: &QueuedSynchronizer<Self>, acquires: i64) -> bool {
        let state = sync.state();
        if state == 0 {
            if sync.compare_and_set_state(0, acquires) {
                sync.set_exclusive_owner(Some(&park::current()));
                return true;
            }
        } else if sync.is_owned_by_current() {
            return reenter(sync, state, acquires);
        }
        false
    }
}

/// Owner re-entry: a plain store is enough because only the owner writes here
fn reenter(sync: &QueuedSynchronizer<LockPolicy>, state: i64, acquires: i64) -> bool {
    match state.checked_add(acquires) {
        Some(next) => {
            sync.set_state(next);
            true
        }
        None => {
            error!(state, "maximum lock count exceeded");
            false
        }
    }
}

impl ExclusivePolicy for LockPolicy {
    fn try_acquire(&self, sync: &QueuedSynchronizer<Self>, acquires: i64) -> bool {
        if !self.fairness.is_fair() {
            return self.barge(sync, acquires);
        }
        let state = sync.state();
        if state == 0 {
            if !sync.has_queued_predecessors() && sync.compare_and_set_state(0, acquires) {
                sync.set_exclusive_owner(Some(&park::current()));
                return true;
            }
        } else if sync.is_owned_by_current() {
            return reenter(sync, state, acquires);
        }
        false
    }

    fn try_release(&self, sync: &QueuedSynchronizer<Self>, releases: i64) -> SyncResult<bool> {
        if !sync.is_owned_by_current() {
            return Err(SyncError::illegal_state(
                "current thread does not hold the lock",
            ));
        }
        let remaining = sync.state() - releases;
        let free = remaining == 0;
        if free {
            sync.set_exclusive_owner(None);
        }
        sync.set_state(remaining);
        Ok(free)
    }

    fn is_held_exclusively(&self, sync: &QueuedSynchronizer<Self>) -> bool {
        sync.is_owned_by_current()
    }
}

/// Reentrant mutual-exclusion lock with optional FIFO fairness
pub struct ReentrantLock {
    sync: Arc<QueuedSynchronizer<LockPolicy>>,
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new(Fairness::NonFair)
    }
}

impl ReentrantLock {
    pub fn new(fairness: Fairness) -> Self {
        Self {
            sync: Arc::new(QueuedSynchronizer::new(LockPolicy { fairness })),
        }
    }

    /// Refuse a re-entry that would overflow the owner's hold count, so the
    /// owner never queues behind itself.
    fn check_reentry(&self) -> SyncResult<()> {
        if self.sync.is_owned_by_current() && self.sync.state() == i64::MAX {
            error!("maximum lock count exceeded");
            return Err(SyncError::illegal_state("maximum lock count exceeded"));
        }
        Ok(())
    }

    /// Acquire, blocking uninterruptibly
    ///
    /// # Panics
    ///
    /// If the owner re-enters with its hold count already at `i64::MAX`.
    ///
    /// # Performance
    ///
    /// Uncontended acquisition is a single CAS on non-fair locks.
    #[inline]
    pub fn lock(&self) {
        if !self.sync.policy().fairness.is_fair() && self.sync.compare_and_set_state(0, 1) {
            self.sync.set_exclusive_owner(Some(&park::current()));
            return;
        }
        if let Err(err) = self.check_reentry() {
            panic!("{err}");
        }
        self.sync.acquire(1);
    }

    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.check_reentry()?;
        self.sync.acquire_interruptibly(1)
    }

    /// Acquire only if free (or already held) at the time of the call.
    /// Barges even on a fair lock.
    pub fn try_lock(&self) -> SyncResult<bool> {
        self.check_reentry()?;
        Ok(self.sync.policy().barge(&self.sync, 1))
    }

    /// Acquire within `timeout`; `Ok(false)` if it elapsed first
    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.check_reentry()?;
        self.sync.try_acquire_for(1, timeout)
    }

    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(1).map(|_| ())
    }

    /// Lock and return a guard that unlocks on drop
    pub fn guard(&self) -> ReentrantLockGuard<'_> {
        self.lock();
        ReentrantLockGuard { lock: self }
    }

    pub fn hold_count(&self) -> i64 {
        if self.sync.is_owned_by_current() {
            self.sync.state()
        } else {
            0
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_owned_by_current()
    }

    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fairness.is_fair()
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<ThreadHandle> {
        if self.sync.state() == 0 {
            return None;
        }
        self.sync.exclusive_owner()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn has_queued_thread(&self, thread: &ThreadHandle) -> bool {
        self.sync.is_queued(thread)
    }

    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.sync.queued_threads()
    }

    pub fn new_condition(&self) -> Condition {
        ConditionObject::new(Arc::clone(&self.sync))
    }

    fn check_condition(&self, condition: &Condition) -> SyncResult<()> {
        if condition.is_owned_by(&self.sync) {
            Ok(())
        } else {
            Err(SyncError::illegal_argument("condition belongs to another lock"))
        }
    }

    pub fn has_waiters(&self, condition: &Condition) -> SyncResult<bool> {
        self.check_condition(condition)?;
        condition.has_waiters()
    }

    pub fn wait_queue_length(&self, condition: &Condition) -> SyncResult<usize> {
        self.check_condition(condition)?;
        condition.wait_queue_length()
    }
}

impl fmt::Display for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner() {
            Some(owner) => write!(f, "[Locked by thread {}]", owner),
            None => f.write_str("[Unlocked]"),
        }
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.is_fair())
            .field("state", &self.sync.state())
            .field("queued", &self.queue_length())
            .finish()
    }
}

/// RAII guard from [`ReentrantLock::guard`]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            error!(%err, "guard released a lock it did not hold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_reentrancy_counts_holds() {
        let lock = ReentrantLock::default();
        lock.lock();
        lock.lock();
        assert_eq!(lock.hold_count(), 2);
        assert!(lock.is_held_by_current_thread());

        lock.unlock().unwrap();
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
        assert_eq!(lock.hold_count(), 0);
    }

    #[test]
    fn test_unlock_without_holding_is_illegal_state() {
        let lock = ReentrantLock::default();
        assert!(matches!(lock.unlock(), Err(SyncError::IllegalState(_))));

        let lock = Arc::new(lock);
        lock.lock();
        let lock_clone = lock.clone();
        let err = thread::spawn(move || lock_clone.unlock()).join().unwrap();
        assert!(matches!(err, Err(SyncError::IllegalState(_))));
        assert!(lock.is_held_by_current_thread());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(ReentrantLock::new(Fairness::Fair));
        lock.lock();

        let lock_clone = lock.clone();
        let (acquired, timed) = thread::spawn(move || {
            let start = Instant::now();
            let timed = lock_clone.try_lock_for(Duration::from_millis(50)).unwrap();
            (lock_clone.try_lock().unwrap(), (timed, start.elapsed()))
        })
        .join()
        .unwrap();

        assert!(!acquired);
        assert!(!timed.0);
        assert!(timed.1 >= Duration::from_millis(50));
        lock.unlock().unwrap();
    }

    #[test]
    fn test_display_names_owner() {
        let lock = Arc::new(ReentrantLock::default());
        assert_eq!(lock.to_string(), "[Unlocked]");

        let lock_clone = lock.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("owner-thread".into())
            .spawn(move || {
                let _guard = lock_clone.guard();
                locked_tx.send(()).unwrap();
                done_rx.recv().unwrap();
            })
            .unwrap();

        locked_rx.recv().unwrap();
        assert_eq!(lock.to_string(), "[Locked by thread owner-thread]");
        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert_eq!(lock.to_string(), "[Unlocked]");
    }

    #[test]
    fn test_lock_interruptibly_reports_interrupt() {
        let lock = Arc::new(ReentrantLock::default());
        lock.lock();

        let (tx, rx) = mpsc::channel();
        let lock_clone = lock.clone();
        let handle = thread::spawn(move || {
            tx.send(park::current()).unwrap();
            lock_clone.lock_interruptibly()
        });

        let target = rx.recv().unwrap();
        while !lock.has_queued_thread(&target) {
            thread::sleep(Duration::from_millis(5));
        }
        target.interrupt();
        assert_eq!(handle.join().unwrap(), Err(SyncError::Interrupted));
        assert!(!lock.has_queued_threads());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_uninterruptible_lock_preserves_interrupt() {
        let lock = Arc::new(ReentrantLock::default());
        lock.lock();

        let (tx, rx) = mpsc::channel();
        let lock_clone = lock.clone();
        let handle = thread::spawn(move || {
            tx.send(park::current()).unwrap();
            lock_clone.lock();
            let flagged = park::is_interrupted();
            lock_clone.unlock().unwrap();
            flagged
        });

        let target = rx.recv().unwrap();
        while !lock.has_queued_thread(&target) {
            thread::sleep(Duration::from_millis(5));
        }
        target.interrupt();
        thread::sleep(Duration::from_millis(20));
        lock.unlock().unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_hold_count_overflow_is_illegal_state() {
        let lock = ReentrantLock::default();
        lock.lock();
        lock.sync.set_state(i64::MAX);

        let illegal = |result: SyncResult<bool>| matches!(result, Err(SyncError::IllegalState(_)));
        assert!(illegal(lock.try_lock()));
        assert!(illegal(lock.try_lock_for(Duration::from_millis(10))));
        assert!(illegal(lock.lock_interruptibly().map(|_| true)));
        assert!(!lock.has_queued_threads());

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| lock.lock()));
        assert!(panicked.is_err());
        assert!(!lock.has_queued_threads());
        assert_eq!(lock.hold_count(), i64::MAX);

        lock.sync.set_state(1);
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_condition_from_other_lock_rejected() {
        let a = ReentrantLock::default();
        let b = ReentrantLock::default();
        let cond = b.new_condition();
        a.lock();
        assert!(matches!(
            a.has_waiters(&cond),
            Err(SyncError::IllegalArgument(_))
        ));
        a.unlock().unwrap();
    }

    #[test]
    fn test_condition_preserves_hold_count() {
        let lock = Arc::new(ReentrantLock::default());
        let cond = lock.new_condition();
        let ready = Arc::new(AtomicBool::new(false));

        let (lock_clone, cond_clone, ready_clone) = (lock.clone(), cond.clone(), ready.clone());
        let handle = thread::spawn(move || {
            lock_clone.lock();
            lock_clone.lock();
            while !ready_clone.load(Ordering::SeqCst) {
                cond_clone.await_().unwrap();
            }
            let holds = lock_clone.hold_count();
            lock_clone.unlock().unwrap();
            lock_clone.unlock().unwrap();
            holds
        });

        loop {
            let _guard = lock.guard();
            if lock.has_waiters(&cond).unwrap() {
                ready.store(true, Ordering::SeqCst);
                cond.signal_all().unwrap();
                break;
            }
            drop(_guard);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.join().unwrap(), 2);
    }
}
