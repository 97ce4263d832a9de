/*!
 * Countdown Latch
 *
 * One-shot gate: threads block in `await_` until `count_down` has been
 * called the configured number of times. Once open it stays open; the
 * count is never reset.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::aqs::{QueuedSynchronizer, SharedPolicy};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Remaining-count policy behind [`CountDownLatch`]
#[derive(Debug)]
pub struct CountPolicy;

impl SharedPolicy for CountPolicy {
    fn try_acquire_shared(&self, sync: &QueuedSynchronizer<Self>, _acquires: i64) -> i64 {
        if sync.state() == 0 {
            1
        } else {
            -1
        }
    }

    fn try_release_shared(&self, sync: &QueuedSynchronizer<Self>, _releases: i64) -> SyncResult<bool> {
        loop {
            let count = sync.state();
            if count == 0 {
                return Ok(false);
            }
            let next = count - 1;
            if sync.compare_and_set_state(count, next) {
                return Ok(next == 0);
            }
        }
    }
}

pub struct CountDownLatch {
    sync: QueuedSynchronizer<CountPolicy>,
}

impl CountDownLatch {
    pub fn new(count: i64) -> SyncResult<Self> {
        if count < 0 {
            return Err(SyncError::illegal_argument("count < 0"));
        }
        Ok(Self {
            sync: QueuedSynchronizer::with_state(CountPolicy, count),
        })
    }

    /// Decrement the count, releasing every waiter when it reaches zero.
    /// No effect once the count is already zero.
    pub fn count_down(&self) {
        match self.sync.release_shared(1) {
            Ok(true) => debug!("latch opened"),
            Ok(false) => {}
            Err(err) => debug!(%err, "latch count down rejected"),
        }
    }

    /// Block until the count reaches zero or the thread is interrupted
    pub fn await_(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// `Ok(false)` if the count was still positive when `timeout` elapsed
    pub fn await_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    pub fn count(&self) -> i64 {
        self.sync.state()
    }
}

impl fmt::Display for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Count = {}]", self.count())
    }
}

impl fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .finish()
    }
}
