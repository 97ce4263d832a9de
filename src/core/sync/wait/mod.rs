/*!
 * Wait/Notify Primitives
 *
 * Blocking support for structures that guard a multi-field invariant with
 * one `parking_lot::Mutex`. Waiters park through `parking_lot_core` so
 * interrupts and deadlines apply uniformly.
 */

mod wait_set;

pub(crate) use wait_set::unpark_interrupted;
pub use wait_set::{WaitOutcome, WaitSet, WakeResult};
