/*!
 * Counting Semaphore
 *
 * Shared-mode primitive whose state word is the number of available
 * permits. Acquirers CAS the count down and queue when it would go
 * negative; releases CAS it back up and wake queued acquirers.
 *
 * Releases are not checked against earlier acquisitions: releasing more
 * permits than were ever taken raises availability past the initial
 * count. This mirrors the classic semaphore contract and is relied on by
 * callers that seed permits through `release`.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::aqs::{QueuedSynchronizer, SharedPolicy};
use crate::core::sync::config::Fairness;
use crate::core::sync::park::ThreadHandle;
use std::fmt;
use std::time::Duration;

/// Permit-count policy behind [`Semaphore`]
#[derive(Debug)]
pub struct PermitPolicy {
    fairness: Fairness,
}

impl PermitPolicy {
    fn barge(&self, sync: &QueuedSynchronizer<Self>, acquires: i64) -> i64 {
        loop {
            let available = sync.state();
            let remaining = available - acquires;
            if remaining < 0 || sync.compare_and_set_state(available, remaining) {
                return remaining;
            }
        }
    }
}

impl SharedPolicy for PermitPolicy {
    fn try_acquire_shared(&self, sync: &QueuedSynchronizer<Self>, acquires: i64) -> i64 {
        if self.fairness.is_fair() && sync.has_queued_predecessors() {
            return -1;
        }
        self.barge(sync, acquires)
    }

    fn try_release_shared(&self, sync: &QueuedSynchronizer<Self>, releases: i64) -> SyncResult<bool> {
        loop {
            let current = sync.state();
            let next = current
                .checked_add(releases)
                .ok_or_else(|| SyncError::illegal_state("maximum permit count exceeded"))?;
            if sync.compare_and_set_state(current, next) {
                return Ok(true);
            }
        }
    }
}

/// Counting semaphore with optional FIFO fairness
pub struct Semaphore {
    sync: QueuedSynchronizer<PermitPolicy>,
}

fn check_permits(permits: i64) -> SyncResult<()> {
    if permits < 0 {
        return Err(SyncError::illegal_argument("permits < 0"));
    }
    Ok(())
}

impl Semaphore {
    pub fn new(permits: i64, fairness: Fairness) -> SyncResult<Self> {
        check_permits(permits)?;
        Ok(Self {
            sync: QueuedSynchronizer::with_state(PermitPolicy { fairness }, permits),
        })
    }

    /// Take one permit, blocking until available or interrupted
    pub fn acquire(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    pub fn acquire_many(&self, permits: i64) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared_interruptibly(permits)
    }

    /// Take one permit; an interrupt while waiting stays pending on the thread
    pub fn acquire_uninterruptibly(&self) {
        self.sync.acquire_shared(1);
    }

    pub fn acquire_many_uninterruptibly(&self, permits: i64) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared(permits);
        Ok(())
    }

    /// Take a permit only if one is available now. Barges even when fair.
    pub fn try_acquire(&self) -> bool {
        self.sync.policy().barge(&self.sync, 1) >= 0
    }

    pub fn try_acquire_many(&self, permits: i64) -> SyncResult<bool> {
        check_permits(permits)?;
        Ok(self.sync.policy().barge(&self.sync, permits) >= 0)
    }

    /// `Ok(false)` if no permit became available within `timeout`
    pub fn try_acquire_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    pub fn try_acquire_many_for(&self, permits: i64, timeout: Duration) -> SyncResult<bool> {
        check_permits(permits)?;
        self.sync.try_acquire_shared_for(permits, timeout)
    }

    /// Return one permit
    pub fn release(&self) -> SyncResult<()> {
        self.sync.release_shared(1).map(|_| ())
    }

    pub fn release_many(&self, permits: i64) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.release_shared(permits).map(|_| ())
    }

    pub fn available_permits(&self) -> i64 {
        self.sync.state()
    }

    /// Take every immediately available permit, returning how many
    pub fn drain_permits(&self) -> i64 {
        loop {
            let current = self.sync.state();
            if current == 0 || self.sync.compare_and_set_state(current, 0) {
                return current;
            }
        }
    }

    /// Shrink availability without blocking; the count may go negative
    pub fn reduce_permits(&self, reduction: i64) -> SyncResult<()> {
        check_permits(reduction)?;
        loop {
            let current = self.sync.state();
            let next = current
                .checked_sub(reduction)
                .ok_or_else(|| SyncError::illegal_state("permit count underflow"))?;
            if self.sync.compare_and_set_state(current, next) {
                return Ok(());
            }
        }
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fairness.is_fair()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.sync.queued_threads()
    }
}

impl fmt::Display for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Permits = {}]", self.available_permits())
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .field("fair", &self.is_fair())
            .field("queued", &self.queue_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::park;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn test_permits_bound_concurrency() {
        let sem = Arc::new(Semaphore::new(3, Fairness::NonFair).unwrap());
        let inside = Arc::new(AtomicI64::new(0));
        let peak = Arc::new(AtomicI64::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let (sem, inside, peak) = (sem.clone(), inside.clone(), peak.clone());
                thread::spawn(move || {
                    for _ in 0..20 {
                        sem.acquire().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        sem.release().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(sem.available_permits(), 3);
    }

    #[test]
    fn test_try_acquire_many() {
        let sem = Semaphore::new(5, Fairness::Fair).unwrap();
        assert!(sem.try_acquire_many(3).unwrap());
        assert!(!sem.try_acquire_many(3).unwrap());
        assert_eq!(sem.available_permits(), 2);
        assert!(matches!(
            sem.try_acquire_many(-1),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_drain_and_reduce() {
        let sem = Semaphore::new(4, Fairness::NonFair).unwrap();
        sem.reduce_permits(1).unwrap();
        assert_eq!(sem.drain_permits(), 3);
        assert_eq!(sem.available_permits(), 0);
        sem.reduce_permits(2).unwrap();
        assert_eq!(sem.available_permits(), -2);
        assert_eq!(sem.to_string(), "[Permits = -2]");
    }

    #[test]
    fn test_negative_initial_permits_rejected() {
        assert!(matches!(
            Semaphore::new(-3, Fairness::NonFair),
            Err(SyncError::IllegalArgument(_))
        ));
        assert!(matches!(
            Semaphore::new(-1, Fairness::Fair),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_reduced_below_zero_blocks_until_released() {
        let sem = Arc::new(Semaphore::new(1, Fairness::NonFair).unwrap());
        sem.reduce_permits(2).unwrap();
        assert_eq!(sem.available_permits(), -1);
        let sem_clone = sem.clone();
        let handle = thread::spawn(move || sem_clone.try_acquire_for(Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(30));
        sem.release().unwrap();
        assert!(!sem.try_acquire());
        sem.release().unwrap();
        assert!(handle.join().unwrap().unwrap());
    }

    #[test]
    fn test_over_release_inflates_availability() {
        // Documented quirk: releases are not matched against acquisitions.
        let sem = Semaphore::new(1, Fairness::NonFair).unwrap();
        sem.release().unwrap();
        sem.release_many(3).unwrap();
        assert_eq!(sem.available_permits(), 5);
    }

    #[test]
    fn test_interrupted_acquire() {
        let sem = Arc::new(Semaphore::new(0, Fairness::Fair).unwrap());
        let (tx, rx) = mpsc::channel();
        let sem_clone = sem.clone();
        let handle = thread::spawn(move || {
            tx.send(park::current()).unwrap();
            sem_clone.acquire()
        });

        let target = rx.recv().unwrap();
        while sem.queue_length() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        target.interrupt();
        assert_eq!(handle.join().unwrap(), Err(SyncError::Interrupted));
        assert_eq!(sem.available_permits(), 0);
        assert_eq!(sem.queue_length(), 0);
    }

    #[test]
    fn test_release_overflow_is_illegal_state() {
        let sem = Semaphore::new(i64::MAX, Fairness::NonFair).unwrap();
        assert!(matches!(sem.release(), Err(SyncError::IllegalState(_))));
    }
}
