/*!
 * Lock-Based Synchronization Primitives
 *
 * Blocking coordination primitives for application threads:
 * - Reentrant lock with conditions (exclusive synchronizer policy)
 * - Counting semaphore and countdown latch (shared synchronizer policies)
 * - Cyclic barrier (own mutex and wait set, generation epochs)
 */

mod barrier;
mod latch;
mod reentrant;
mod semaphore;

// Re-export public API
pub use barrier::CyclicBarrier;
pub use latch::{CountDownLatch, CountPolicy};
pub use reentrant::{Condition, LockPolicy, ReentrantLock, ReentrantLockGuard};
pub use semaphore::{PermitPolicy, Semaphore};
