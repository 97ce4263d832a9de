/*!
 * Thread Parking and Interruption
 *
 * Every blocking primitive in this crate suspends threads through the
 * functions below. Parking follows `std::thread::park` token semantics: an
 * `unpark` delivered before `park` makes the next `park` return at once,
 * and any park may return spuriously, so callers always re-check their
 * condition in a loop.
 *
 * # Interruption
 *
 * Each thread carries an interrupt flag reachable through its
 * [`ThreadHandle`]. `interrupt()` sets the flag and unparks the thread,
 * both from its thread token and from any wait set it is parked on;
 * interruptible waits notice the flag, clean up their queue membership,
 * clear the flag and report [`SyncError::Interrupted`](crate::core::errors::SyncError).
 */

use crate::core::sync::wait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Ids start at 1 so that 0 can mean "no thread" in atomic owner slots
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Fallback horizon for timeouts too large to add to `Instant::now()`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub(crate) struct ThreadRecord {
    pub(crate) id: u64,
    thread: Thread,
    interrupted: AtomicBool,
    /// Wait-set key while parked interruptibly, 0 otherwise
    parked_on: AtomicUsize,
}

/// Cloneable handle to a thread that can be unparked and interrupted
#[derive(Clone)]
pub struct ThreadHandle {
    record: Arc<ThreadRecord>,
}

thread_local! {
    static CURRENT: ThreadHandle = ThreadHandle::for_current();
}

impl ThreadHandle {
    fn for_current() -> Self {
        Self {
            record: Arc::new(ThreadRecord {
                id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
                thread: thread::current(),
                interrupted: AtomicBool::new(false),
                parked_on: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn from_record(record: Arc<ThreadRecord>) -> Self {
        Self { record }
    }

    pub(crate) fn record(&self) -> &Arc<ThreadRecord> {
        &self.record
    }

    /// Crate-assigned id, unique for the life of the process and never 0
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn name(&self) -> Option<&str> {
        self.record.thread.name()
    }

    pub fn thread(&self) -> &Thread {
        &self.record.thread
    }

    /// Set the interrupt flag and wake the thread if it is parked
    pub fn interrupt(&self) {
        self.record.interrupted.store(true, Ordering::SeqCst);
        self.record.thread.unpark();
        let key = self.record.parked_on.load(Ordering::SeqCst);
        if key != 0 {
            wait::unpark_interrupted(key, self.id());
        }
    }

    pub(crate) fn set_parked_on(&self, key: usize) {
        self.record.parked_on.store(key, Ordering::SeqCst);
    }

    pub(crate) fn clear_parked_on(&self) {
        self.record.parked_on.store(0, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.record.interrupted.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn unpark(&self) {
        self.record.thread.unpark();
    }

    pub fn is_current(&self) -> bool {
        self.id() == current_id()
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ThreadHandle {}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "thread-{}", self.id()),
        }
    }
}

/// Handle of the calling thread
pub fn current() -> ThreadHandle {
    CURRENT.with(ThreadHandle::clone)
}

#[inline]
pub fn current_id() -> u64 {
    CURRENT.with(ThreadHandle::id)
}

/// Test and clear the calling thread's interrupt flag
pub fn interrupted() -> bool {
    CURRENT.with(|handle| handle.record.interrupted.swap(false, Ordering::SeqCst))
}

/// Test the calling thread's interrupt flag without clearing it
pub fn is_interrupted() -> bool {
    CURRENT.with(ThreadHandle::is_interrupted)
}

/// Re-assert an interrupt that an uninterruptible wait swallowed
pub(crate) fn self_interrupt() {
    CURRENT.with(|handle| handle.record.interrupted.store(true, Ordering::SeqCst));
}

#[inline]
pub fn park() {
    thread::park();
}

#[inline]
pub fn park_timeout(timeout: Duration) {
    thread::park_timeout(timeout);
}

/// Park until `deadline`, an unpark, or a spurious wake-up
pub fn park_until(deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !remaining.is_zero() {
        thread::park_timeout(remaining);
    }
}

#[inline]
pub fn unpark(handle: &ThreadHandle) {
    handle.unpark();
}

/// Absolute deadline for a relative timeout, computed once at call entry
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}
