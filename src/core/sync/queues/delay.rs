/*!
 * Delay Queue
 *
 * Unbounded blocking queue whose head is the element with the least
 * remaining delay. An element can only be taken once its delay has
 * elapsed.
 *
 * # Leader/Follower Waiting
 *
 * At most one waiting thread is the leader. Only the leader parks with a
 * timeout equal to the head's remaining delay; every other taker parks
 * without a timeout until it is signalled. When an offer installs a new
 * head, the leader designation is dropped and one waiter is signalled so
 * that someone recomputes the wait against the earlier deadline. A taker
 * that leaves with the queue non-empty and no leader signals a successor,
 * so the role is never abandoned while elements remain.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::park;
use crate::core::sync::wait::{WaitOutcome, WaitSet};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Element of a [`DelayQueue`].
///
/// `Ord` must agree with `delay`: an element that compares less expires
/// no later than one that compares greater.
pub trait Delayed: Ord {
    /// Time left before the element becomes available; zero once expired
    fn delay(&self) -> Duration;
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A value that becomes available at a fixed instant.
///
/// Entries with equal deadlines are ordered by creation, so they leave the
/// queue in the order they were made.
#[derive(Debug, Clone)]
pub struct DelayedEntry<T> {
    value: T,
    deadline: Instant,
    sequence: u64,
}

impl<T> DelayedEntry<T> {
    pub fn new(value: T, delay: Duration) -> Self {
        Self::at(value, park::deadline_after(delay))
    }

    pub fn at(value: T, deadline: Instant) -> Self {
        Self {
            value,
            deadline,
            sequence: NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl<T> PartialEq for DelayedEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl<T> Eq for DelayedEntry<T> {}

impl<T> PartialOrd for DelayedEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl<T> Delayed for DelayedEntry<T> {
    fn delay(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

struct DelayState<E> {
    heap: BinaryHeap<Reverse<E>>,
    /// Thread id of the taker timing the head's delay
    leader: Option<u64>,
}

impl<E: Delayed> DelayState<E> {
    fn head_delay(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(head)| head.delay())
    }

    fn pop_expired(&mut self) -> Option<E> {
        match self.head_delay() {
            Some(delay) if delay.is_zero() => self.heap.pop().map(|Reverse(e)| e),
            _ => None,
        }
    }
}

pub struct DelayQueue<E> {
    state: Mutex<DelayState<E>>,
    available: WaitSet,
}

impl<E: Delayed> Default for DelayQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Delayed> DelayQueue<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DelayState {
                heap: BinaryHeap::new(),
                leader: None,
            }),
            available: WaitSet::new(),
        }
    }

    /// Insert an element. Never blocks.
    pub fn offer(&self, element: E) {
        let mut state = self.state.lock();
        let becomes_head = state
            .heap
            .peek()
            .map_or(true, |Reverse(head)| element < *head);
        state.heap.push(Reverse(element));
        if becomes_head {
            if let Some(leader) = state.leader.take() {
                trace!(leader, "delay queue head replaced, leader released");
            }
            self.available.notify_one();
        }
    }

    /// Same as [`offer`](Self::offer); the queue is unbounded
    pub fn put(&self, element: E) {
        self.offer(element);
    }

    /// Remove the head if its delay has elapsed
    pub fn poll(&self) -> Option<E> {
        self.state.lock().pop_expired()
    }

    /// Block until an element expires or the thread is interrupted
    pub fn take(&self) -> SyncResult<E> {
        // Untimed waits only end with an element or an interrupt.
        self.dowait(None)?
            .ok_or_else(|| SyncError::illegal_state("untimed delay queue wait returned empty"))
    }

    /// `Ok(None)` if nothing expired within `timeout`
    pub fn poll_timeout(&self, timeout: Duration) -> SyncResult<Option<E>> {
        self.dowait(Some(park::deadline_after(timeout)))
    }

    fn dowait(&self, deadline: Option<Instant>) -> SyncResult<Option<E>> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let me = park::current_id();
        let mut state = self.state.lock();

        let result = loop {
            if let Some(element) = state.pop_expired() {
                break Ok(Some(element));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break Ok(None);
            }

            let outcome = match state.head_delay() {
                None => match deadline {
                    Some(deadline) => self.available.wait_until(&mut state, deadline),
                    None => self.available.wait(&mut state),
                },
                Some(delay) => {
                    let head_deadline = park::deadline_after(delay);
                    let outlives_caller = deadline.is_some_and(|deadline| deadline < head_deadline);
                    if state.leader.is_some() || outlives_caller {
                        match deadline {
                            Some(deadline) => self.available.wait_until(&mut state, deadline),
                            None => self.available.wait(&mut state),
                        }
                    } else {
                        state.leader = Some(me);
                        trace!(leader = me, ?delay, "delay queue leader waiting on head");
                        let outcome = self.available.wait_until(&mut state, head_deadline);
                        if state.leader == Some(me) {
                            state.leader = None;
                        }
                        outcome
                    }
                }
            };

            if outcome == WaitOutcome::Interrupted {
                break Err(SyncError::Interrupted);
            }
        };

        if state.leader.is_none() && !state.heap.is_empty() {
            self.available.notify_one();
        }
        result
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Remove one element equal to `element`, expired or not
    pub fn remove(&self, element: &E) -> bool {
        let mut state = self.state.lock();
        let mut elements = std::mem::take(&mut state.heap).into_vec();
        let found = elements.iter().position(|Reverse(e)| e == element);
        if let Some(index) = found {
            elements.swap_remove(index);
        }
        state.heap = BinaryHeap::from(elements);
        found.is_some()
    }

    pub fn clear(&self) {
        self.state.lock().heap.clear();
    }

    /// Move every expired element into `sink`, returning how many moved
    pub fn drain_to<C: Extend<E>>(&self, sink: &mut C) -> usize {
        self.drain_to_max(sink, usize::MAX)
    }

    pub fn drain_to_max<C: Extend<E>>(&self, sink: &mut C, max: usize) -> usize {
        let mut state = self.state.lock();
        let mut moved = 0;
        while moved < max {
            match state.pop_expired() {
                Some(element) => {
                    sink.extend(Some(element));
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }
}

impl<E: Delayed + Clone> DelayQueue<E> {
    /// Clone of the head, expired or not
    pub fn peek(&self) -> Option<E> {
        self.state.lock().heap.peek().map(|Reverse(head)| head.clone())
    }

    /// Snapshot of all elements, earliest first
    pub fn to_vec(&self) -> Vec<E> {
        let snapshot = self.state.lock().heap.clone();
        snapshot
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(e)| e)
            .collect()
    }
}

impl<E: Delayed> fmt::Debug for DelayQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DelayQueue")
            .field("len", &state.heap.len())
            .field("leader", &state.leader)
            .field("head_delay", &state.head_delay())
            .finish()
    }
}
