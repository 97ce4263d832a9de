/*!
 * Iterator Registry
 *
 * Bookkeeping that keeps live `ArrayBlockingQueue` iterators consistent
 * with the ring buffer. Lives inside the queue's locked state, so every
 * method here runs with the queue mutex held.
 *
 * # Cursor Maintenance
 *
 * Each entry caches the index of the next element its iterator will
 * yield, plus the `take_index` and wrap count it last saw. Dequeues are
 * folded in lazily: the number of elements taken since the last visit is
 * `(cycles - prev_cycles) * len + take_index - prev_take_index`, and a
 * cursor whose element was among them restarts at the head. Interior
 * removals shift later elements back by one slot, so they are applied
 * eagerly to every entry.
 *
 * # Sweeping
 *
 * Entries leave the registry when their iterator detaches (exhausted or
 * dropped). Stale entries are purged by a bounded scan on registration,
 * a longer scan on detach, a full pass whenever `take_index` wraps, and
 * a full purge when the queue becomes empty.
 */

use crate::core::limits::{LONG_SWEEP_SCANS, SHORT_SWEEP_SCANS};
use tracing::{debug, trace};

/// Ring positions an entry needs to correct its cursor
#[derive(Debug, Clone, Copy)]
pub(super) struct RingView {
    pub(super) take_index: usize,
    pub(super) put_index: usize,
    pub(super) count: usize,
    pub(super) len: usize,
}

#[inline]
fn distance(index: usize, origin: usize, len: usize) -> usize {
    (index + len - origin) % len
}

#[derive(Debug)]
pub(super) struct IterEntry {
    id: u64,
    /// Slot of the next element to yield; `None` once exhausted
    pub(super) cursor: Option<usize>,
    prev_take_index: usize,
    prev_cycles: u64,
    detached: bool,
}

impl IterEntry {
    /// Account for elements taken from the head since the last visit
    pub(super) fn incorporate_dequeues(&mut self, ring: RingView, cycles: u64) {
        if cycles == self.prev_cycles && ring.take_index == self.prev_take_index {
            return;
        }
        let dequeues = (cycles - self.prev_cycles) as usize * ring.len + ring.take_index
            - self.prev_take_index;
        if let Some(cursor) = self.cursor {
            if dequeues > distance(cursor, self.prev_take_index, ring.len) {
                self.cursor = (ring.count > 0).then_some(ring.take_index);
            }
        }
        self.prev_take_index = ring.take_index;
        self.prev_cycles = cycles;
    }

    /// Slot `removed` was deleted and everything after it shifted back by
    /// one. `ring` already reflects the shift.
    fn removed_at(&mut self, removed: usize, ring: RingView) {
        let Some(cursor) = self.cursor else {
            return;
        };
        let removed_distance = distance(removed, ring.take_index, ring.len);
        let cursor_distance = distance(cursor, ring.take_index, ring.len);
        if cursor_distance == removed_distance {
            // The successor slid into the cursor's slot, unless there was none.
            if cursor == ring.put_index {
                self.cursor = None;
            }
        } else if cursor_distance > removed_distance {
            self.cursor = Some((cursor + ring.len - 1) % ring.len);
        }
        if self.cursor.is_none() {
            self.detached = true;
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct IteratorRegistry {
    entries: Vec<IterEntry>,
    /// Times `take_index` has wrapped back to slot 0
    cycles: u64,
    next_id: u64,
    sweeper: usize,
}

impl IteratorRegistry {
    pub(super) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(super) fn cycles(&self) -> u64 {
        self.cycles
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Track a new iterator whose first element sits at `take_index`
    pub(super) fn register(&mut self, take_index: usize) -> u64 {
        self.sweep(SHORT_SWEEP_SCANS);
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(IterEntry {
            id,
            cursor: Some(take_index),
            prev_take_index: take_index,
            prev_cycles: self.cycles,
            detached: false,
        });
        id
    }

    /// Live entry for `id`, or `None` if it was shut down
    pub(super) fn entry_mut(&mut self, id: u64) -> Option<&mut IterEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id && !entry.detached)
    }

    pub(super) fn detach(&mut self, id: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            entry.detached = true;
            entry.cursor = None;
        }
        self.sweep(LONG_SWEEP_SCANS);
    }

    /// Called after every head removal with the updated ring
    pub(super) fn element_dequeued(&mut self, ring: RingView) {
        if ring.take_index == 0 {
            self.take_index_wrapped();
        }
        if ring.count == 0 {
            self.queue_is_empty();
        }
    }

    /// Called after an interior removal at `removed`, once later elements
    /// have been shifted back and `ring` updated.
    pub(super) fn removed_at(&mut self, removed: usize, ring: RingView) {
        let cycles = self.cycles;
        for entry in self.entries.iter_mut().filter(|entry| !entry.detached) {
            entry.incorporate_dequeues(ring, cycles);
            entry.removed_at(removed, ring);
        }
        self.entries.retain(|entry| !entry.detached);
    }

    /// Every iterator loses its pending work when the queue empties
    pub(super) fn queue_is_empty(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        debug!(iterators = self.entries.len(), "queue empty, shutting down iterators");
        self.entries.clear();
        self.sweeper = 0;
    }

    fn take_index_wrapped(&mut self) {
        self.cycles += 1;
        let cycles = self.cycles;
        let before = self.entries.len();
        // More than one cycle behind means the cached cursor is meaningless.
        self.entries
            .retain(|entry| !entry.detached && cycles - entry.prev_cycles <= 1);
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed, cycles, "take index wrapped, stale iterators dropped");
        }
    }

    /// Scan up to `scans` entries from the last sweep position, purging
    /// detached ones. Finding one restarts the budget at the long scan count.
    fn sweep(&mut self, scans: usize) {
        let total = self.entries.len();
        let mut scans = scans;
        let mut visited = 0;
        let mut removed = 0;
        let mut index = if self.sweeper < total { self.sweeper } else { 0 };

        while scans > 0 && visited < total && !self.entries.is_empty() {
            if index >= self.entries.len() {
                index = 0;
            }
            if self.entries[index].detached {
                self.entries.swap_remove(index);
                removed += 1;
                scans = LONG_SWEEP_SCANS;
            } else {
                index += 1;
                scans -= 1;
            }
            visited += 1;
        }

        self.sweeper = index;
        if removed > 0 {
            trace!(removed, remaining = self.entries.len(), "iterator registry swept");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(take_index: usize, put_index: usize, count: usize) -> RingView {
        RingView {
            take_index,
            put_index,
            count,
            len: 4,
        }
    }

    #[test]
    fn test_dequeue_past_cursor_restarts_at_head() {
        let mut registry = IteratorRegistry::new();
        let id = registry.register(0);
        let entry = registry.entry_mut(id).unwrap();
        entry.cursor = Some(1);

        entry.incorporate_dequeues(ring(2, 3, 1), 0);
        assert_eq!(entry.cursor, Some(2));
    }

    #[test]
    fn test_dequeue_behind_cursor_keeps_it() {
        let mut registry = IteratorRegistry::new();
        let id = registry.register(0);
        let entry = registry.entry_mut(id).unwrap();
        entry.cursor = Some(2);

        entry.incorporate_dequeues(ring(1, 3, 2), 0);
        assert_eq!(entry.cursor, Some(2));
    }

    #[test]
    fn test_removal_ahead_shifts_cursor_back() {
        let mut registry = IteratorRegistry::new();
        let id = registry.register(0);
        registry.entry_mut(id).unwrap().cursor = Some(2);

        // Slot 1 removed; slots 2..3 slid back, put index now 2.
        registry.removed_at(1, ring(0, 2, 2));
        assert_eq!(registry.entry_mut(id).unwrap().cursor, Some(1));
    }

    #[test]
    fn test_removing_last_pending_element_detaches() {
        let mut registry = IteratorRegistry::new();
        let id = registry.register(0);
        registry.entry_mut(id).unwrap().cursor = Some(2);

        registry.removed_at(2, ring(0, 2, 2));
        assert!(registry.entry_mut(id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_wrap_drops_entries_two_cycles_behind() {
        let mut registry = IteratorRegistry::new();
        let id = registry.register(1);
        registry.element_dequeued(ring(0, 2, 2));
        assert!(registry.entry_mut(id).is_some());
        registry.element_dequeued(ring(0, 2, 2));
        assert!(registry.entry_mut(id).is_none());
    }

    #[test]
    fn test_empty_queue_purges_everything() {
        let mut registry = IteratorRegistry::new();
        registry.register(0);
        registry.register(0);
        registry.element_dequeued(ring(1, 1, 0));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registration_sweeps_detached() {
        let mut registry = IteratorRegistry::new();
        let ids: Vec<_> = (0..3).map(|_| registry.register(0)).collect();
        for id in &ids {
            registry.detach(*id);
        }
        assert_eq!(registry.len(), 0);

        registry.register(0);
        assert_eq!(registry.len(), 1);
    }
}
