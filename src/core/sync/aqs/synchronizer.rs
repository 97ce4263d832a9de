/*!
 * Queued Synchronizer
 *
 * FIFO wait-queue engine over a single `i64` state word. Primitives give
 * the state word its meaning through an [`ExclusivePolicy`] or
 * [`SharedPolicy`]; this type owns queueing, parking, cancellation and
 * wake-up propagation.
 *
 * # Design
 *
 * - State and queue links change only through CAS; no lock guards them.
 * - Threads are appended at the tail. Only the head's successor retries
 *   the policy; any wake-up is a hint to retry, never a hand-off.
 * - A thread that arrives while others are queued may still succeed on its
 *   fast path (barging) unless its policy checks
 *   [`has_queued_predecessors`](QueuedSynchronizer::has_queued_predecessors).
 * - Interruption and timeout cancel the node in O(1); cancelled nodes are
 *   skipped and unlinked by later traversals.
 */

use super::node::{cas_link, same, Mode, Node, WaitStatus};
use super::policy::{ExclusivePolicy, SharedPolicy};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::SPIN_FOR_TIMEOUT_THRESHOLD;
use crate::core::sync::park::{self, ThreadHandle, ThreadRecord};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Generic exclusive/shared acquire-release engine
pub struct QueuedSynchronizer<P> {
    state: AtomicI64,
    head: ArcSwapOption<Node>,
    tail: ArcSwapOption<Node>,
    owner: ArcSwapOption<ThreadRecord>,
    policy: P,
}

impl<P> QueuedSynchronizer<P> {
    pub fn new(policy: P) -> Self {
        Self::with_state(policy, 0)
    }

    pub fn with_state(policy: P, state: i64) -> Self {
        Self {
            state: AtomicI64::new(state),
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
            owner: ArcSwapOption::empty(),
            policy,
        }
    }

    #[inline(always)]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[inline(always)]
    pub fn state(&self) -> i64 {
        self.state.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub fn set_state(&self, state: i64) {
        self.state.store(state, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn compare_and_set_state(&self, expect: i64, update: i64) -> bool {
        self.state
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    // =========================================================================
    // Exclusive owner
    // =========================================================================

    pub fn set_exclusive_owner(&self, owner: Option<&ThreadHandle>) {
        self.owner.store(owner.map(|handle| Arc::clone(handle.record())));
    }

    pub fn exclusive_owner(&self) -> Option<ThreadHandle> {
        self.owner.load_full().map(ThreadHandle::from_record)
    }

    #[inline]
    pub fn is_owned_by_current(&self) -> bool {
        let owner = self.owner.load();
        match &*owner {
            Some(record) => record.id == park::current_id(),
            None => false,
        }
    }

    // =========================================================================
    // Queue maintenance
    // =========================================================================

    #[inline]
    fn is_head(&self, node: &Arc<Node>) -> bool {
        same(self.head.load_full().as_ref(), Some(node))
    }

    /// Append `node` at the tail, installing a dummy head on first use.
    /// Returns the predecessor.
    pub(crate) fn enq(&self, node: &Arc<Node>) -> Arc<Node> {
        loop {
            match self.tail.load_full() {
                None => {
                    let dummy = Arc::new(Node::dummy());
                    if cas_link(&self.head, None, Some(Arc::clone(&dummy))) {
                        self.tail.store(Some(dummy));
                    }
                }
                Some(tail) => {
                    node.prev.store(Some(Arc::clone(&tail)));
                    if cas_link(&self.tail, Some(&tail), Some(Arc::clone(node))) {
                        tail.next.store(Some(Arc::clone(node)));
                        return tail;
                    }
                }
            }
        }
    }

    fn add_waiter(&self, mode: Mode) -> Arc<Node> {
        let node = Arc::new(Node::new(park::current(), mode, WaitStatus::None));
        self.enq(&node);
        trace!(?mode, thread = node.waiter_id(), "queued after failed fast path");
        node
    }

    fn set_head(&self, node: &Arc<Node>) {
        self.head.store(Some(Arc::clone(node)));
        node.clear_waiter();
        node.prev.store(None);
    }

    /// Wake the first live successor of `node`, searching backwards from the
    /// tail when the forward link is missing or cancelled.
    fn unpark_successor(&self, node: &Arc<Node>) {
        let status = node.status();
        if status.is_waiting() {
            node.compare_and_set_status(status, WaitStatus::None);
        }

        let mut successor = node.next.load_full();
        if successor.as_ref().map_or(true, |s| s.is_cancelled()) {
            successor = None;
            let mut cursor = self.tail.load_full();
            while let Some(candidate) = cursor {
                if Arc::ptr_eq(&candidate, node) {
                    break;
                }
                if !candidate.is_cancelled() {
                    successor = Some(Arc::clone(&candidate));
                }
                cursor = candidate.prev.load_full();
            }
        }
        if let Some(successor) = successor {
            successor.unpark();
        }
    }

    /// Release action for shared mode: signal the successor and make sure
    /// propagation continues even if the head changes underneath.
    fn do_release_shared(&self) {
        loop {
            let head = self.head.load_full();
            if let Some(h) = &head {
                let tail = self.tail.load_full();
                if !same(Some(h), tail.as_ref()) {
                    match h.status() {
                        WaitStatus::Signal => {
                            if !h.compare_and_set_status(WaitStatus::Signal, WaitStatus::None) {
                                continue;
                            }
                            self.unpark_successor(h);
                        }
                        WaitStatus::None => {
                            if !h.compare_and_set_status(WaitStatus::None, WaitStatus::Propagate) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            }
            if same(head.as_ref(), self.head.load_full().as_ref()) {
                break;
            }
        }
    }

    fn set_head_and_propagate(&self, node: &Arc<Node>, propagate: i64) {
        let old_head = self.head.load_full();
        self.set_head(node);

        let wants_signal =
            |head: Option<Arc<Node>>| head.map_or(true, |h| h.status().is_waiting());
        if propagate > 0 || wants_signal(old_head) || wants_signal(self.head.load_full()) {
            let next = node.next.load_full();
            if next.map_or(true, |n| n.is_shared()) {
                self.do_release_shared();
            }
        }
    }

    /// Abandon an in-progress acquire. The node is marked cancelled and
    /// bypassed; it is never removed from the middle of the queue eagerly.
    fn cancel_acquire(&self, node: &Arc<Node>) {
        node.clear_waiter();

        let mut pred = node.prev.load_full();
        while let Some(p) = pred.as_ref().filter(|p| p.is_cancelled()) {
            let skipped = p.prev.load_full();
            node.prev.store(skipped.clone());
            pred = skipped;
        }
        trace!(thread = park::current_id(), "cancelling queued acquire");

        let Some(pred) = pred else {
            node.set_status(WaitStatus::Cancelled);
            return;
        };
        let pred_next = pred.next.load_full();
        node.set_status(WaitStatus::Cancelled);

        if cas_link(&self.tail, Some(node), Some(Arc::clone(&pred))) {
            cas_link(&pred.next, pred_next.as_ref(), None);
            return;
        }

        let pred_will_signal = !self.is_head(&pred)
            && {
                let status = pred.status();
                status == WaitStatus::Signal
                    || (status != WaitStatus::Cancelled
                        && pred.compare_and_set_status(status, WaitStatus::Signal))
            }
            && pred.waiter_id() != 0;

        if pred_will_signal {
            if let Some(next) = node.next.load_full() {
                if !next.is_cancelled() {
                    cas_link(&pred.next, pred_next.as_ref(), Some(next));
                }
            }
        } else {
            self.unpark_successor(node);
        }
        node.next.store(None);
    }

    /// Decide whether a thread that failed to acquire should park. Skips
    /// cancelled predecessors and asks the live one to signal on release.
    fn should_park_after_failed_acquire(&self, pred: &Arc<Node>, node: &Arc<Node>) -> bool {
        match pred.status() {
            WaitStatus::Signal => true,
            WaitStatus::Cancelled => {
                let mut live = pred.prev.load_full();
                while let Some(p) = live.as_ref().filter(|p| p.is_cancelled()) {
                    live = p.prev.load_full();
                }
                node.prev.store(live.clone());
                if let Some(live) = live {
                    live.next.store(Some(Arc::clone(node)));
                }
                false
            }
            status => {
                pred.compare_and_set_status(status, WaitStatus::Signal);
                false
            }
        }
    }

    /// Park, then report (and clear) any interrupt that arrived
    fn park_and_check_interrupt(&self) -> bool {
        park::park();
        park::interrupted()
    }

    // =========================================================================
    // Queue inspection
    // =========================================================================

    /// True if any thread is waiting to acquire
    pub fn has_queued_threads(&self) -> bool {
        !same(
            self.head.load_full().as_ref(),
            self.tail.load_full().as_ref(),
        )
    }

    /// True once any thread has ever had to queue
    pub fn has_contended(&self) -> bool {
        self.head.load_full().is_some()
    }

    /// True if some other thread has been waiting longer than the caller.
    /// Fair policies refuse to barge when this holds.
    pub fn has_queued_predecessors(&self) -> bool {
        let tail = self.tail.load_full();
        let head = self.head.load_full();
        match head {
            Some(h) if !same(Some(&h), tail.as_ref()) => match h.next.load_full() {
                None => true,
                Some(s) => s.waiter_id() != park::current_id(),
            },
            _ => false,
        }
    }

    /// Live queued nodes from head to tail
    fn live_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = Vec::new();
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if node.waiting_thread().is_some() {
                nodes.push(Arc::clone(&node));
            }
            cursor = node.prev.load_full();
        }
        nodes.reverse();
        nodes
    }

    /// Longest-waiting queued thread
    pub fn first_queued_thread(&self) -> Option<ThreadHandle> {
        if let Some(head) = self.head.load_full() {
            if let Some(next) = head.next.load_full() {
                if let Some(thread) = next.waiting_thread() {
                    if next.prev.load_full().is_some() {
                        return Some(thread.clone());
                    }
                }
            }
        }
        self.live_nodes()
            .first()
            .and_then(|node| node.waiting_thread().cloned())
    }

    pub fn is_queued(&self, thread: &ThreadHandle) -> bool {
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if node.waiter_id() == thread.id() {
                return true;
            }
            cursor = node.prev.load_full();
        }
        false
    }

    /// Estimate of the number of queued threads
    pub fn queue_length(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if node.waiter_id() != 0 {
                count += 1;
            }
            cursor = node.prev.load_full();
        }
        count
    }

    fn threads_matching(&self, filter: impl Fn(&Node) -> bool) -> Vec<ThreadHandle> {
        self.live_nodes()
            .iter()
            .filter(|node| filter(node))
            .filter_map(|node| node.waiting_thread().cloned())
            .collect()
    }

    /// Queued threads, longest-waiting first
    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.threads_matching(|_| true)
    }

    pub fn exclusive_queued_threads(&self) -> Vec<ThreadHandle> {
        self.threads_matching(|node| !node.is_shared())
    }

    pub fn shared_queued_threads(&self) -> Vec<ThreadHandle> {
        self.threads_matching(Node::is_shared)
    }

    // =========================================================================
    // Condition support
    // =========================================================================

    /// Whether a condition node has been transferred onto the sync queue
    pub(crate) fn is_on_sync_queue(&self, node: &Arc<Node>) -> bool {
        if node.status() == WaitStatus::Condition || node.prev.load_full().is_none() {
            return false;
        }
        if node.next.load_full().is_some() {
            return true;
        }
        // prev may be set while the tail CAS is still pending; confirm from the tail.
        let mut cursor = self.tail.load_full();
        while let Some(candidate) = cursor {
            if Arc::ptr_eq(&candidate, node) {
                return true;
            }
            cursor = candidate.prev.load_full();
        }
        false
    }

    /// Move a signalled condition node onto the sync queue.
    /// False if the node was cancelled before the signal.
    pub(crate) fn transfer_for_signal(&self, node: &Arc<Node>) -> bool {
        if !node.compare_and_set_status(WaitStatus::Condition, WaitStatus::None) {
            return false;
        }
        let pred = self.enq(node);
        let status = pred.status();
        if status == WaitStatus::Cancelled
            || !pred.compare_and_set_status(status, WaitStatus::Signal)
        {
            node.unpark();
        }
        true
    }

    /// Transfer a condition node whose wait was cancelled. True if the
    /// cancellation happened before any signal.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: &Arc<Node>) -> bool {
        if node.compare_and_set_status(WaitStatus::Condition, WaitStatus::None) {
            self.enq(node);
            return true;
        }
        // A signaller won the race; wait until it finishes the enqueue.
        while !self.is_on_sync_queue(node) {
            std::thread::yield_now();
        }
        false
    }
}

// =============================================================================
// Exclusive mode
// =============================================================================

impl<P: ExclusivePolicy> QueuedSynchronizer<P> {
    /// Acquire uninterruptibly. An interrupt observed while queued is
    /// re-asserted on the thread before returning.
    pub fn acquire(&self, arg: i64) {
        if self.policy.try_acquire(self, arg) {
            return;
        }
        let node = self.add_waiter(Mode::Exclusive);
        if self.acquire_queued(&node, arg) {
            park::self_interrupt();
        }
    }

    /// Acquire for an already-queued node; returns whether an interrupt
    /// arrived while waiting.
    pub(crate) fn acquire_queued(&self, node: &Arc<Node>, arg: i64) -> bool {
        let mut interrupted = false;
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) && self.policy.try_acquire(self, arg) {
                    self.set_head(node);
                    pred.next.store(None);
                    return interrupted;
                }
                if self.should_park_after_failed_acquire(pred, node)
                    && self.park_and_check_interrupt()
                {
                    interrupted = true;
                }
            }
        }
    }

    pub fn acquire_interruptibly(&self, arg: i64) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(self, arg) {
            return Ok(());
        }

        let node = self.add_waiter(Mode::Exclusive);
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) && self.policy.try_acquire(self, arg) {
                    self.set_head(&node);
                    pred.next.store(None);
                    return Ok(());
                }
                if self.should_park_after_failed_acquire(pred, &node)
                    && self.park_and_check_interrupt()
                {
                    self.cancel_acquire(&node);
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }

    /// Acquire with a bound. `Ok(false)` when the timeout elapses first.
    pub fn try_acquire_for(&self, arg: i64, timeout: Duration) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(self, arg) {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.acquire_until(arg, park::deadline_after(timeout))
    }

    fn acquire_until(&self, arg: i64, deadline: Instant) -> SyncResult<bool> {
        let node = self.add_waiter(Mode::Exclusive);
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) && self.policy.try_acquire(self, arg) {
                    self.set_head(&node);
                    pred.next.store(None);
                    return Ok(true);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    self.cancel_acquire(&node);
                    return Ok(false);
                }
                if self.should_park_after_failed_acquire(pred, &node)
                    && remaining > SPIN_FOR_TIMEOUT_THRESHOLD
                {
                    park::park_timeout(remaining);
                }
                if park::interrupted() {
                    self.cancel_acquire(&node);
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }

    /// Release through the policy and wake the head's successor when the
    /// synchronizer became free.
    pub fn release(&self, arg: i64) -> SyncResult<bool> {
        if !self.policy.try_release(self, arg)? {
            return Ok(false);
        }
        if let Some(head) = self.head.load_full() {
            if head.status() != WaitStatus::None {
                self.unpark_successor(&head);
            }
        }
        Ok(true)
    }

    pub fn is_held_exclusively(&self) -> bool {
        self.policy.is_held_exclusively(self)
    }

    /// Release the full state for a condition wait, returning the saved
    /// state to re-acquire with.
    pub(crate) fn fully_release(&self, node: &Arc<Node>) -> SyncResult<i64> {
        let saved = self.state();
        match self.release(saved) {
            Ok(true) => Ok(saved),
            Ok(false) => {
                node.set_status(WaitStatus::Cancelled);
                Err(SyncError::illegal_state(
                    "condition awaited without holding the lock",
                ))
            }
            Err(err) => {
                node.set_status(WaitStatus::Cancelled);
                Err(err)
            }
        }
    }
}

// =============================================================================
// Shared mode
// =============================================================================

impl<P: SharedPolicy> QueuedSynchronizer<P> {
    pub fn acquire_shared(&self, arg: i64) {
        if self.policy.try_acquire_shared(self, arg) >= 0 {
            return;
        }
        let node = self.add_waiter(Mode::Shared);
        let mut interrupted = false;
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) {
                    let remaining = self.policy.try_acquire_shared(self, arg);
                    if remaining >= 0 {
                        self.set_head_and_propagate(&node, remaining);
                        pred.next.store(None);
                        if interrupted {
                            park::self_interrupt();
                        }
                        return;
                    }
                }
                if self.should_park_after_failed_acquire(pred, &node)
                    && self.park_and_check_interrupt()
                {
                    interrupted = true;
                }
            }
        }
    }

    pub fn acquire_shared_interruptibly(&self, arg: i64) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(self, arg) >= 0 {
            return Ok(());
        }

        let node = self.add_waiter(Mode::Shared);
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) {
                    let remaining = self.policy.try_acquire_shared(self, arg);
                    if remaining >= 0 {
                        self.set_head_and_propagate(&node, remaining);
                        pred.next.store(None);
                        return Ok(());
                    }
                }
                if self.should_park_after_failed_acquire(pred, &node)
                    && self.park_and_check_interrupt()
                {
                    self.cancel_acquire(&node);
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }

    /// Shared acquire with a bound. `Ok(false)` when the timeout elapses first.
    pub fn try_acquire_shared_for(&self, arg: i64, timeout: Duration) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(self, arg) >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }

        let deadline = park::deadline_after(timeout);
        let node = self.add_waiter(Mode::Shared);
        loop {
            let pred = node.prev.load_full();
            if let Some(pred) = &pred {
                if self.is_head(pred) {
                    let remaining = self.policy.try_acquire_shared(self, arg);
                    if remaining >= 0 {
                        self.set_head_and_propagate(&node, remaining);
                        pred.next.store(None);
                        return Ok(true);
                    }
                }
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    self.cancel_acquire(&node);
                    return Ok(false);
                }
                if self.should_park_after_failed_acquire(pred, &node)
                    && left > SPIN_FOR_TIMEOUT_THRESHOLD
                {
                    park::park_timeout(left);
                }
                if park::interrupted() {
                    self.cancel_acquire(&node);
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }

    pub fn release_shared(&self, arg: i64) -> SyncResult<bool> {
        if self.policy.try_release_shared(self, arg)? {
            self.do_release_shared();
            return Ok(true);
        }
        Ok(false)
    }
}

impl<P> fmt::Debug for QueuedSynchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedSynchronizer")
            .field("state", &self.state())
            .field("queued", &self.has_queued_threads())
            .finish()
    }
}
