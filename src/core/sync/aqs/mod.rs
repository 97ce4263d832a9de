/*!
 * Queued Synchronizer Framework
 *
 * Foundation for the lock-style primitives: an atomic state word, a
 * lock-free FIFO queue of parked threads, and condition wait sets.
 *
 * # Architecture
 *
 * - `synchronizer`: queueing, parking, cancellation, release propagation
 * - `policy`: the hooks a primitive supplies to give the state its meaning
 * - `condition`: release-and-wait sets for exclusive holders
 * - `node`: queue entries and CAS helpers over their links
 */

mod condition;
mod node;
mod policy;
mod synchronizer;

pub use condition::ConditionObject;
pub use node::{Mode, WaitStatus};
pub use policy::{ExclusivePolicy, SharedPolicy};
pub use synchronizer::QueuedSynchronizer;
