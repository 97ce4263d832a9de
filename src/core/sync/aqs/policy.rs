/*!
 * Acquisition Policies
 *
 * A primitive plugs its meaning of the state word into the synchronizer by
 * supplying a policy value at construction. Exclusive-mode operations are
 * only available for `P: ExclusivePolicy`, shared-mode ones only for
 * `P: SharedPolicy`, so a primitive cannot call into a mode it never
 * defined.
 *
 * Hooks must not block. They read and CAS the state word through the
 * synchronizer passed in and report the outcome; queueing, parking and
 * wake-ups are the synchronizer's job.
 */

use super::synchronizer::QueuedSynchronizer;
use crate::core::errors::SyncResult;

/// Exclusive acquire/release hooks
pub trait ExclusivePolicy: Sized + Send + Sync {
    /// Attempt to acquire in exclusive mode; `false` means "queue and block"
    fn try_acquire(&self, sync: &QueuedSynchronizer<Self>, arg: i64) -> bool;

    /// Update the state for a release. `Ok(true)` when the synchronizer is
    /// now fully released and a queued thread may acquire.
    fn try_release(&self, sync: &QueuedSynchronizer<Self>, arg: i64) -> SyncResult<bool>;

    /// Whether the calling thread holds the synchronizer exclusively
    fn is_held_exclusively(&self, sync: &QueuedSynchronizer<Self>) -> bool;
}

/// Shared acquire/release hooks
pub trait SharedPolicy: Sized + Send + Sync {
    /// Negative on failure, zero on success with nothing left for other
    /// shared acquirers, positive on success that subsequent shared
    /// acquirers may also succeed.
    fn try_acquire_shared(&self, sync: &QueuedSynchronizer<Self>, arg: i64) -> i64;

    /// `Ok(true)` when the release may let a waiting acquirer succeed
    fn try_release_shared(&self, sync: &QueuedSynchronizer<Self>, arg: i64) -> SyncResult<bool>;
}
