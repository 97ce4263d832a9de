/*!
 * Striped Counter
 *
 * Contention-spreading 64-bit accumulator. Updates first try a CAS on a
 * shared `base`; once that CAS is observed to fail, each thread is steered
 * to one of a small power-of-two table of cache-line isolated cells, picked
 * by a per-thread hash.
 *
 * # Table Maintenance
 *
 * The table is created lazily with [`INITIAL_STRIPES`] cells, cells are
 * attached lazily per slot, and the table doubles when a thread keeps
 * colliding on a cell, never beyond `StripedConfig::max_stripes`. All
 * structural changes happen under a one-bit busy flag taken with a single
 * CAS; a thread that cannot take it rehashes or falls back to
 * `base` instead of waiting. Tables are replaced copy-on-write and share
 * their cells, so no update is lost across a resize.
 *
 * # Reads
 *
 * `sum` adds `base` and every cell without locking. Concurrent updates
 * may or may not be reflected; the result is exact only when no update
 * is in flight.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::{INITIAL_STRIPES, HASH_SEED_INCREMENT};
use crate::core::sync::config::StripedConfig;
use arc_swap::ArcSwapOption;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
#[derive(Debug)]
struct CounterCell {
    value: AtomicI64,
}

impl CounterCell {
    fn new(value: i64) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicI64::new(value),
        })
    }

    #[inline]
    fn try_add(&self, x: i64) -> bool {
        let current = self.value.load(Ordering::Relaxed);
        self.value
            .compare_exchange_weak(current, current.wrapping_add(x), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

type CellTable = Vec<Option<Arc<CounterCell>>>;

static HASH_SEEDER: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_HASH: Cell<u32> = const { Cell::new(0) };
}

/// Calling thread's hash, seeded on first use; never 0
fn thread_hash() -> u32 {
    THREAD_HASH.with(|hash| {
        let mut h = hash.get();
        if h == 0 {
            h = HASH_SEEDER
                .fetch_add(HASH_SEED_INCREMENT, Ordering::Relaxed)
                .wrapping_add(HASH_SEED_INCREMENT);
            if h == 0 {
                h = 1;
            }
            hash.set(h);
        }
        h
    })
}

/// Xorshift step, stored as the thread's new hash
fn advance_hash(mut h: u32) -> u32 {
    h ^= h << 13;
    h ^= h >> 17;
    h ^= h << 5;
    THREAD_HASH.with(|hash| hash.set(h));
    h
}

/// Held while the cell table is being created, extended or grown
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sum of per-thread contributions optimized for write-heavy contention
pub struct StripedCounter {
    base: AtomicI64,
    cells: ArcSwapOption<CellTable>,
    cells_busy: AtomicBool,
    max_stripes: usize,
}

impl StripedCounter {
    /// Counter for up to `parallelism` concurrent updaters
    pub fn new(parallelism: usize) -> SyncResult<Self> {
        Self::from_config(StripedConfig::with_parallelism(parallelism))
    }

    pub fn from_config(config: StripedConfig) -> SyncResult<Self> {
        if config.parallelism == 0 {
            return Err(SyncError::illegal_argument("parallelism must be positive"));
        }
        Ok(Self {
            base: AtomicI64::new(0),
            cells: ArcSwapOption::empty(),
            cells_busy: AtomicBool::new(false),
            max_stripes: config.max_stripes(),
        })
    }

    pub fn add(&self, x: i64) {
        let table = self.cells.load_full();
        if table.is_none() && self.cas_base(x) {
            return;
        }

        let hash = thread_hash();
        let mut uncontended = true;
        if let Some(cells) = &table {
            if let Some(cell) = &cells[hash as usize & (cells.len() - 1)] {
                if cell.try_add(x) {
                    return;
                }
                uncontended = false;
            }
        }
        self.accumulate(x, hash, uncontended);
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn decrement(&self) {
        self.add(-1);
    }

    #[inline]
    fn cas_base(&self, x: i64) -> bool {
        let current = self.base.load(Ordering::Relaxed);
        self.base
            .compare_exchange(current, current.wrapping_add(x), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn try_lock_cells(&self) -> Option<BusyGuard<'_>> {
        self.cells_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BusyGuard(&self.cells_busy))
    }

    fn is_current(&self, table: &Arc<CellTable>) -> bool {
        let current = self.cells.load();
        match &*current {
            Some(current) => Arc::ptr_eq(current, table),
            None => false,
        }
    }

    /// Slow path once contention has been seen
    fn accumulate(&self, x: i64, mut hash: u32, mut uncontended: bool) {
        let mut collide = false;
        loop {
            let table = self.cells.load_full();
            let Some(cells) = &table else {
                if let Some(_busy) = self.try_lock_cells() {
                    if self.cells.load().is_none() {
                        let len = INITIAL_STRIPES.min(self.max_stripes);
                        let mut fresh: CellTable = vec![None; len];
                        fresh[hash as usize & (len - 1)] = Some(CounterCell::new(x));
                        self.cells.store(Some(Arc::new(fresh)));
                        trace!(stripes = len, "striped counter cells initialized");
                        return;
                    }
                    continue;
                }
                if self.cas_base(x) {
                    return;
                }
                continue;
            };

            let len = cells.len();
            match &cells[hash as usize & (len - 1)] {
                None => {
                    if let Some(_busy) = self.try_lock_cells() {
                        let current = self.cells.load_full();
                        if let Some(current) = current {
                            let slot = hash as usize & (current.len() - 1);
                            if current[slot].is_none() {
                                let mut attached: CellTable = (*current).clone();
                                attached[slot] = Some(CounterCell::new(x));
                                self.cells.store(Some(Arc::new(attached)));
                                return;
                            }
                        }
                        continue;
                    }
                    collide = false;
                }
                Some(cell) => {
                    if !uncontended {
                        // Known failed CAS on this cell; rehash before retrying.
                        uncontended = true;
                    } else if cell.try_add(x) {
                        return;
                    } else if len >= self.max_stripes || !self.is_current(cells) {
                        collide = false;
                    } else if !collide {
                        collide = true;
                    } else if let Some(_busy) = self.try_lock_cells() {
                        if self.is_current(cells) {
                            let mut grown: CellTable = Vec::with_capacity(len << 1);
                            grown.extend(cells.iter().cloned());
                            grown.resize(len << 1, None);
                            self.cells.store(Some(Arc::new(grown)));
                            trace!(stripes = len << 1, "striped counter table grown");
                        }
                        collide = false;
                        continue;
                    }
                }
            }
            hash = advance_hash(hash);
        }
    }

    /// Current total; not an atomic snapshot under concurrent updates
    pub fn sum(&self) -> i64 {
        let mut sum = self.base.load(Ordering::Acquire);
        if let Some(cells) = &*self.cells.load() {
            for cell in cells.iter().flatten() {
                sum = sum.wrapping_add(cell.value.load(Ordering::Acquire));
            }
        }
        sum
    }

    /// Zero the counter. Only meaningful when no updates are in flight.
    pub fn reset(&self) {
        self.base.store(0, Ordering::Release);
        if let Some(cells) = &*self.cells.load() {
            for cell in cells.iter().flatten() {
                cell.value.store(0, Ordering::Release);
            }
        }
    }

    /// Equivalent to `sum` followed by `reset`, swapping each part to zero
    pub fn sum_then_reset(&self) -> i64 {
        let mut sum = self.base.swap(0, Ordering::AcqRel);
        if let Some(cells) = &*self.cells.load() {
            for cell in cells.iter().flatten() {
                sum = sum.wrapping_add(cell.value.swap(0, Ordering::AcqRel));
            }
        }
        sum
    }

    /// Length of the cell table; 0 until contention is first observed
    pub fn stripe_count(&self) -> usize {
        match &*self.cells.load() {
            Some(cells) => cells.len(),
            None => 0,
        }
    }
}

impl fmt::Display for StripedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sum())
    }
}

impl fmt::Debug for StripedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedCounter")
            .field("sum", &self.sum())
            .field("stripes", &self.stripe_count())
            .field("max_stripes", &self.max_stripes)
            .finish()
    }
}

impl From<&StripedCounter> for i64 {
    fn from(counter: &StripedCounter) -> Self {
        counter.sum()
    }
}
