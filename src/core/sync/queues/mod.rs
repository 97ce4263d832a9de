/*!
 * Blocking Queues
 *
 * Mutex-guarded queues whose invariants span several fields:
 * - Delay queue: unbounded, ordered by remaining delay, leader/follower waits
 * - Array blocking queue: bounded ring buffer with registry-tracked iterators
 */

mod array_blocking;
mod delay;
mod itrs;

// Re-export public API
pub use array_blocking::{ArrayBlockingQueue, Iter};
pub use delay::{DelayQueue, Delayed, DelayedEntry};
