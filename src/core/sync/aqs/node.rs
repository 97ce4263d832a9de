/*!
 * Wait Queue Nodes
 *
 * One node per blocked thread. Links are `ArcSwapOption`s so the queue can
 * be spliced with CAS alone while every node stays reference counted.
 *
 * Reference cycles are broken as nodes leave the queue: a node that becomes
 * head drops its back link and its predecessor drops the forward link; a
 * cancelled node drops its forward link.
 */

use crate::core::sync::park::ThreadHandle;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Queue-entry status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WaitStatus {
    /// Timed out or interrupted; never changes again
    Cancelled = 1,
    /// Freshly queued or already signalled
    None = 0,
    /// Successor is (or will soon be) parked and must be unparked on release
    Signal = -1,
    /// Waiting on a condition queue
    Condition = -2,
    /// A shared release must propagate past this head
    Propagate = -3,
}

impl WaitStatus {
    #[inline(always)]
    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => WaitStatus::Cancelled,
            -1 => WaitStatus::Signal,
            -2 => WaitStatus::Condition,
            -3 => WaitStatus::Propagate,
            _ => WaitStatus::None,
        }
    }

    /// Signal, Condition or Propagate
    #[inline(always)]
    pub fn is_waiting(self) -> bool {
        (self as i32) < 0
    }
}

/// Acquisition mode of a queued node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Exclusive,
    Shared,
}

pub(crate) struct Node {
    pub(crate) mode: Mode,
    status: AtomicI32,
    pub(crate) prev: ArcSwapOption<Node>,
    pub(crate) next: ArcSwapOption<Node>,
    thread: Option<ThreadHandle>,
    /// Id of the waiting thread; 0 once the node is head or cancelled
    waiter: AtomicU64,
}

impl Node {
    pub(crate) fn new(thread: ThreadHandle, mode: Mode, status: WaitStatus) -> Self {
        Self {
            mode,
            status: AtomicI32::new(status as i32),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            waiter: AtomicU64::new(thread.id()),
            thread: Some(thread),
        }
    }

    /// Placeholder head installed on first contention
    pub(crate) fn dummy() -> Self {
        Self {
            mode: Mode::Exclusive,
            status: AtomicI32::new(WaitStatus::None as i32),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            thread: None,
            waiter: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn status(&self) -> WaitStatus {
        WaitStatus::from_raw(self.status.load(Ordering::SeqCst))
    }

    #[inline(always)]
    pub(crate) fn set_status(&self, status: WaitStatus) {
        self.status.store(status as i32, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn compare_and_set_status(&self, expect: WaitStatus, update: WaitStatus) -> bool {
        self.status
            .compare_exchange(
                expect as i32,
                update as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    #[inline(always)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.status() == WaitStatus::Cancelled
    }

    #[inline(always)]
    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    #[inline(always)]
    pub(crate) fn waiter_id(&self) -> u64 {
        self.waiter.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_waiter(&self) {
        self.waiter.store(0, Ordering::SeqCst);
    }

    /// Handle of the waiting thread, if the node still has one
    pub(crate) fn waiting_thread(&self) -> Option<&ThreadHandle> {
        if self.waiter_id() == 0 {
            return None;
        }
        self.thread.as_ref()
    }

    pub(crate) fn unpark(&self) {
        if let Some(thread) = self.waiting_thread() {
            thread.unpark();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("mode", &self.mode)
            .field("status", &self.status())
            .field("waiter", &self.waiter_id())
            .finish()
    }
}

/// Pointer identity over optional links
#[inline(always)]
pub(crate) fn same(a: Option<&Arc<Node>>, b: Option<&Arc<Node>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// CAS a link from `current` to `new`, reporting whether the swap happened
pub(crate) fn cas_link(
    slot: &ArcSwapOption<Node>,
    current: Option<&Arc<Node>>,
    new: Option<Arc<Node>>,
) -> bool {
    let expected: Option<Arc<Node>> = current.cloned();
    let previous = slot.compare_and_swap(&expected, new);
    same((*previous).as_ref(), current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::park;

    #[test]
    fn test_status_transitions() {
        let node = Node::new(park::current(), Mode::Exclusive, WaitStatus::None);
        assert!(node.compare_and_set_status(WaitStatus::None, WaitStatus::Signal));
        assert!(!node.compare_and_set_status(WaitStatus::None, WaitStatus::Propagate));
        assert!(node.status().is_waiting());
        node.set_status(WaitStatus::Cancelled);
        assert!(node.is_cancelled());
    }

    #[test]
    fn test_cas_link_identity() {
        let slot = ArcSwapOption::empty();
        let a = Arc::new(Node::dummy());
        let b = Arc::new(Node::dummy());

        assert!(cas_link(&slot, None, Some(a.clone())));
        assert!(!cas_link(&slot, Some(&b), Some(b.clone())));
        assert!(cas_link(&slot, Some(&a), Some(b.clone())));
        assert!(same(slot.load_full().as_ref(), Some(&b)));
    }

    #[test]
    fn test_cleared_waiter_hides_thread() {
        let node = Node::new(park::current(), Mode::Shared, WaitStatus::None);
        assert_eq!(node.waiter_id(), park::current_id());
        assert!(node.is_shared());
        node.clear_waiter();
        assert!(node.waiting_thread().is_none());
    }
}
