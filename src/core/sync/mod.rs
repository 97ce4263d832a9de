/*!
 * Synchronization Primitives
 *
 * Blocking and lock-free coordination primitives for application threads.
 *
 * # Architecture
 *
 * - `aqs`: the queued synchronizer. An atomic state word plus a lock-free
 *   FIFO queue of parked threads; a policy value decides what acquiring
 *   and releasing mean.
 * - `locks`: reentrant lock, semaphore and countdown latch built as
 *   synchronizer policies, plus the cyclic barrier.
 * - `queues`: delay queue and bounded array queue. Their invariants span
 *   several fields, so each guards its state with one mutex and waits on
 *   a `WaitSet`.
 * - `lockfree`: striped counter.
 * - `park` / `wait`: thread parking, interruption and wait sets shared by
 *   everything above.
 *
 * # Blocking Contract
 *
 * - Interruptible operations return `SyncError::Interrupted` with the
 *   thread's queue membership already unwound and the flag cleared
 * - Timed operations compute one deadline at entry and report expiry as
 *   `false` / `None`, never as an error
 * - Fair primitives admit queued threads in FIFO order; non-fair ones let
 *   arriving threads barge
 */

pub mod aqs;
mod config;
mod lockfree;
mod locks;
pub mod park;
mod queues;
mod wait;

pub use aqs::{ConditionObject, ExclusivePolicy, QueuedSynchronizer, SharedPolicy};
pub use config::{Fairness, QueueConfig, StripedConfig};
pub use lockfree::StripedCounter;
pub use locks::{
    Condition, CountDownLatch, CountPolicy, CyclicBarrier, LockPolicy, PermitPolicy, ReentrantLock,
    ReentrantLockGuard, Semaphore,
};
pub use park::ThreadHandle;
pub use queues::{ArrayBlockingQueue, DelayQueue, Delayed, DelayedEntry, Iter};
pub use wait::{WaitOutcome, WaitSet, WakeResult};
