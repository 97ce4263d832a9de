/*!
 * AI-OS Sync Library
 * Thread coordination primitives exposed as a library
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{SyncError, SyncResult};
pub use crate::core::sync::{
    park, ArrayBlockingQueue, Condition, CountDownLatch, CyclicBarrier, DelayQueue, Delayed,
    DelayedEntry, Fairness, QueueConfig, ReentrantLock, ReentrantLockGuard, Semaphore,
    StripedConfig, StripedCounter, ThreadHandle,
};
pub use monitoring::{init_tracing, span_scenario};
