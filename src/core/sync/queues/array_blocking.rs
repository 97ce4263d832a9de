/*!
 * Array Blocking Queue
 *
 * Bounded FIFO queue over a fixed ring buffer. One mutex guards the ring
 * and both ends; producers wait on `not_full` and consumers on
 * `not_empty`.
 *
 * # Iteration
 *
 * Iterators are weakly consistent and yield clones. Interior removal
 * shifts elements inside the ring, so every live iterator is registered
 * with an [`IteratorRegistry`](super::itrs) that corrects its cursor on
 * each removal. An iterator never yields a removed element and never
 * skips one that stays present while it walks. Dropping or exhausting an
 * iterator detaches it from the registry.
 */

use super::itrs::{IteratorRegistry, RingView};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::config::{Fairness, QueueConfig};
use crate::core::sync::park;
use crate::core::sync::wait::{WaitOutcome, WaitSet};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

struct RingState<E> {
    items: Box<[Option<E>]>,
    take_index: usize,
    put_index: usize,
    count: usize,
    itrs: IteratorRegistry,
}

impl<E> RingState<E> {
    #[inline]
    fn inc(&self, index: usize) -> usize {
        if index + 1 == self.items.len() {
            0
        } else {
            index + 1
        }
    }

    fn view(&self) -> RingView {
        RingView {
            take_index: self.take_index,
            put_index: self.put_index,
            count: self.count,
            len: self.items.len(),
        }
    }

    /// Slots holding elements, head first
    fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        let len = self.items.len();
        (0..self.count).map(move |offset| (self.take_index + offset) % len)
    }
}

pub struct ArrayBlockingQueue<E> {
    state: Mutex<RingState<E>>,
    not_empty: WaitSet,
    not_full: WaitSet,
    fairness: Fairness,
}

impl<E> ArrayBlockingQueue<E> {
    pub fn new(capacity: usize, fairness: Fairness) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::illegal_argument("capacity must be positive"));
        }
        Ok(Self {
            state: Mutex::new(RingState {
                items: (0..capacity).map(|_| None).collect(),
                take_index: 0,
                put_index: 0,
                count: 0,
                itrs: IteratorRegistry::new(),
            }),
            not_empty: WaitSet::with_fairness(fairness),
            not_full: WaitSet::with_fairness(fairness),
            fairness,
        })
    }

    pub fn from_config(config: QueueConfig) -> SyncResult<Self> {
        Self::new(config.capacity, config.fairness)
    }

    /// Queue pre-filled from `items` in iteration order
    pub fn with_items<I>(capacity: usize, fairness: Fairness, items: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = E>,
    {
        let queue = Self::new(capacity, fairness)?;
        {
            let mut state = queue.state.lock();
            for item in items {
                if state.count == capacity {
                    return Err(SyncError::illegal_argument(
                        "initial items exceed queue capacity",
                    ));
                }
                queue.enqueue(&mut state, item);
            }
        }
        Ok(queue)
    }

    fn release(&self, guard: MutexGuard<'_, RingState<E>>) {
        if self.fairness.is_fair() {
            MutexGuard::unlock_fair(guard);
        } else {
            drop(guard);
        }
    }

    fn enqueue(&self, state: &mut RingState<E>, item: E) {
        let slot = state.put_index;
        state.items[slot] = Some(item);
        state.put_index = state.inc(slot);
        state.count += 1;
        self.not_empty.notify_one();
    }

    fn dequeue(&self, state: &mut RingState<E>) -> Option<E> {
        if state.count == 0 {
            return None;
        }
        let slot = state.take_index;
        let item = state.items[slot].take();
        state.take_index = state.inc(slot);
        state.count -= 1;
        let ring = state.view();
        state.itrs.element_dequeued(ring);
        self.not_full.notify_one();
        item
    }

    /// Delete the element at `slot`, closing the gap by shifting later
    /// elements toward the head.
    fn remove_at(&self, state: &mut RingState<E>, slot: usize) {
        if slot == state.take_index {
            self.dequeue(state);
            return;
        }
        let mut pred = slot;
        loop {
            let next = state.inc(pred);
            if next == state.put_index {
                state.items[pred] = None;
                state.put_index = pred;
                break;
            }
            state.items[pred] = state.items[next].take();
            pred = next;
        }
        state.count -= 1;
        let ring = state.view();
        state.itrs.removed_at(slot, ring);
        self.not_full.notify_one();
    }

    /// Insert at the tail, waiting for space
    pub fn put(&self, item: E) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let mut state = self.state.lock();
        while state.count == state.items.len() {
            if self.not_full.wait(&mut state) == WaitOutcome::Interrupted {
                return Err(SyncError::Interrupted);
            }
        }
        self.enqueue(&mut state, item);
        self.release(state);
        Ok(())
    }

    /// Insert without waiting; a full queue hands the element back
    pub fn offer(&self, item: E) -> Result<(), E> {
        let mut state = self.state.lock();
        if state.count == state.items.len() {
            return Err(item);
        }
        self.enqueue(&mut state, item);
        self.release(state);
        Ok(())
    }

    /// Insert, waiting up to `timeout` for space. `Ok(Err(item))` on timeout.
    pub fn offer_timeout(&self, item: E, timeout: Duration) -> SyncResult<Result<(), E>> {
        let deadline = park::deadline_after(timeout);
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let mut state = self.state.lock();
        while state.count == state.items.len() {
            if Instant::now() >= deadline {
                return Ok(Err(item));
            }
            if self.not_full.wait_until(&mut state, deadline) == WaitOutcome::Interrupted {
                return Err(SyncError::Interrupted);
            }
        }
        self.enqueue(&mut state, item);
        self.release(state);
        Ok(Ok(()))
    }

    /// Remove the head, waiting for an element
    pub fn take(&self) -> SyncResult<E> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.dequeue(&mut state) {
                self.release(state);
                return Ok(item);
            }
            if self.not_empty.wait(&mut state) == WaitOutcome::Interrupted {
                return Err(SyncError::Interrupted);
            }
        }
    }

    pub fn poll(&self) -> Option<E> {
        let mut state = self.state.lock();
        let item = self.dequeue(&mut state);
        self.release(state);
        item
    }

    /// `Ok(None)` if the queue stayed empty for `timeout`
    pub fn poll_timeout(&self, timeout: Duration) -> SyncResult<Option<E>> {
        let deadline = park::deadline_after(timeout);
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.dequeue(&mut state) {
                self.release(state);
                return Ok(Some(item));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if self.not_empty.wait_until(&mut state, deadline) == WaitOutcome::Interrupted {
                return Err(SyncError::Interrupted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().count == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        let state = self.state.lock();
        state.items.len() - state.count
    }

    pub fn is_fair(&self) -> bool {
        self.fairness.is_fair()
    }

    /// Drop every element. Live iterators are shut down.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if state.count == 0 {
            return;
        }
        let slots: Vec<_> = state.occupied().collect();
        for slot in slots {
            state.items[slot] = None;
        }
        state.take_index = state.put_index;
        state.count = 0;
        state.itrs.queue_is_empty();
        self.not_full.notify_all();
        self.release(state);
    }

    pub fn drain_to<C: Extend<E>>(&self, sink: &mut C) -> usize {
        self.drain_to_max(sink, usize::MAX)
    }

    /// Move up to `max` elements, head first, into `sink`
    pub fn drain_to_max<C: Extend<E>>(&self, sink: &mut C, max: usize) -> usize {
        let mut state = self.state.lock();
        let mut moved = 0;
        while moved < max {
            match self.dequeue(&mut state) {
                Some(item) => {
                    sink.extend(Some(item));
                    moved += 1;
                }
                None => break,
            }
        }
        self.release(state);
        moved
    }

    /// Registered iterators, for diagnostics
    pub fn live_iterators(&self) -> usize {
        self.state.lock().itrs.len()
    }
}

impl<E: PartialEq> ArrayBlockingQueue<E> {
    pub fn contains(&self, item: &E) -> bool {
        let state = self.state.lock();
        let found = state
            .occupied()
            .any(|slot| state.items[slot].as_ref() == Some(item));
        found
    }

    /// Remove the first element equal to `item`, wherever it sits
    pub fn remove(&self, item: &E) -> bool {
        let mut state = self.state.lock();
        let found = state
            .occupied()
            .find(|&slot| state.items[slot].as_ref() == Some(item));
        match found {
            Some(slot) => {
                self.remove_at(&mut state, slot);
                self.release(state);
                true
            }
            None => false,
        }
    }
}

impl<E: Clone> ArrayBlockingQueue<E> {
    pub fn peek(&self) -> Option<E> {
        let state = self.state.lock();
        if state.count == 0 {
            return None;
        }
        state.items[state.take_index].clone()
    }

    /// Snapshot of the elements, head first
    pub fn to_vec(&self) -> Vec<E> {
        let state = self.state.lock();
        state
            .occupied()
            .filter_map(|slot| state.items[slot].clone())
            .collect()
    }

    /// Weakly consistent iterator over clones of the elements
    pub fn iter(&self) -> Iter<'_, E> {
        let mut state = self.state.lock();
        let id = if state.count == 0 {
            None
        } else {
            let take_index = state.take_index;
            Some(state.itrs.register(take_index))
        };
        Iter { queue: self, id }
    }
}

impl<E> fmt::Debug for ArrayBlockingQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ArrayBlockingQueue")
            .field("len", &state.count)
            .field("capacity", &state.items.len())
            .field("fair", &self.fairness.is_fair())
            .field("iterators", &state.itrs.len())
            .finish()
    }
}

/// Iterator returned by [`ArrayBlockingQueue::iter`]
pub struct Iter<'a, E> {
    queue: &'a ArrayBlockingQueue<E>,
    /// Registry id; `None` once exhausted or detached
    id: Option<u64>,
}

impl<E> Iter<'_, E> {
    /// Stop iterating and leave the queue's registry
    pub fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            self.queue.state.lock().itrs.detach(id);
        }
    }
}

impl<E: Clone> Iterator for Iter<'_, E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        let id = self.id?;
        let mut guard = self.queue.state.lock();
        let state = &mut *guard;
        let ring = state.view();
        let cycles = state.itrs.cycles();

        let Some(entry) = state.itrs.entry_mut(id) else {
            // Shut down by the registry.
            self.id = None;
            return None;
        };
        entry.incorporate_dequeues(ring, cycles);
        let item = match entry.cursor {
            Some(cursor) => {
                let next = (cursor + 1) % ring.len;
                entry.cursor = (next != ring.put_index).then_some(next);
                state.items[cursor].clone()
            }
            None => None,
        };
        if entry.cursor.is_none() {
            self.id = None;
            state.itrs.detach(id);
        }
        item
    }
}

impl<E> Drop for Iter<'_, E> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn queue_of(capacity: usize, items: &[u32]) -> ArrayBlockingQueue<u32> {
        ArrayBlockingQueue::with_items(capacity, Fairness::NonFair, items.iter().copied()).unwrap()
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            ArrayBlockingQueue::<u32>::new(0, Fairness::NonFair),
            Err(SyncError::IllegalArgument(_))
        ));
        assert!(matches!(
            ArrayBlockingQueue::with_items(2, Fairness::Fair, [1, 2, 3]),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let queue = queue_of(3, &[1, 2]);
        assert_eq!(queue.poll(), Some(1));
        queue.offer(3).unwrap();
        queue.offer(4).unwrap();
        assert_eq!(queue.offer(5), Err(5));
        assert_eq!(queue.to_vec(), vec![2, 3, 4]);
        assert_eq!(queue.remaining_capacity(), 0);

        let mut drained = Vec::new();
        assert_eq!(queue.drain_to(&mut drained), 3);
        assert_eq!(drained, vec![2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interior_remove_closes_gap() {
        let queue = queue_of(4, &[1, 2, 3, 4]);
        assert!(queue.remove(&2));
        assert!(!queue.remove(&2));
        assert!(queue.contains(&3));
        assert_eq!(queue.to_vec(), vec![1, 3, 4]);
        queue.offer(5).unwrap();
        assert_eq!(queue.to_vec(), vec![1, 3, 4, 5]);
        assert_eq!(queue.peek(), Some(1));
    }

    #[test]
    fn test_put_blocks_until_take() {
        let queue = Arc::new(queue_of(1, &[1]));
        let queue_clone = queue.clone();
        let producer = thread::spawn(move || queue_clone.put(2));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take().unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.take().unwrap(), 2);
    }

    #[test]
    fn test_timed_operations_expire() {
        let queue = queue_of(1, &[1]);
        assert_eq!(
            queue.offer_timeout(2, Duration::from_millis(20)).unwrap(),
            Err(2)
        );
        assert_eq!(queue.poll_timeout(Duration::from_millis(20)).unwrap(), Some(1));
        assert_eq!(queue.poll_timeout(Duration::from_millis(20)).unwrap(), None);
    }

    #[test]
    fn test_interrupted_take() {
        let queue: Arc<ArrayBlockingQueue<u32>> =
            Arc::new(ArrayBlockingQueue::new(2, Fairness::Fair).unwrap());
        let (tx, rx) = mpsc::channel();
        let queue_clone = queue.clone();
        let consumer = thread::spawn(move || {
            tx.send(park::current()).unwrap();
            queue_clone.take()
        });

        let target = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        target.interrupt();
        assert_eq!(consumer.join().unwrap(), Err(SyncError::Interrupted));
    }

    #[test]
    fn test_iterator_walks_snapshot_in_order() {
        let queue = queue_of(4, &[1, 2, 3]);
        let items: Vec<_> = queue.iter().collect();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(queue.live_iterators(), 0);
    }

    #[test]
    fn test_iterator_skips_removed_element() {
        let queue = queue_of(5, &[1, 2, 3, 4]);
        let mut iter = queue.iter();
        assert_eq!(iter.next(), Some(1));
        assert_eq!(queue.take().unwrap(), 1);
        assert_eq!(iter.next(), Some(2));
        assert!(queue.remove(&3));
        assert_eq!(iter.collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_iterator_follows_removal_behind_cursor() {
        let queue = queue_of(5, &[1, 2, 3, 4]);
        let mut iter = queue.iter();
        assert_eq!(iter.next(), Some(1));
        assert_eq!(iter.next(), Some(2));
        assert!(queue.remove(&2));
        assert_eq!(iter.collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_iterator_restarts_at_head_after_overtaking_dequeues() {
        let queue = queue_of(4, &[1, 2, 3, 4]);
        let mut iter = queue.iter();
        assert_eq!(iter.next(), Some(1));
        queue.poll();
        queue.poll();
        queue.poll();
        assert_eq!(iter.collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_clear_shuts_down_iterators() {
        let queue = queue_of(3, &[1, 2, 3]);
        let mut iter = queue.iter();
        assert_eq!(iter.next(), Some(1));
        queue.clear();
        queue.offer(9).unwrap();
        assert_eq!(iter.next(), None);
        assert_eq!(queue.live_iterators(), 0);
    }

    #[test]
    fn test_dropped_iterators_are_swept() {
        let queue = queue_of(3, &[1, 2, 3]);
        for _ in 0..10 {
            let mut iter = queue.iter();
            iter.next();
        }
        assert_eq!(queue.live_iterators(), 0);

        let held = queue.iter();
        assert_eq!(queue.live_iterators(), 1);
        drop(held);
        assert_eq!(queue.live_iterators(), 0);
    }
}
