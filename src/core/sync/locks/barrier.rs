/*!
 * Cyclic Barrier
 *
 * Rendezvous point for a fixed number of parties, reusable across rounds.
 *
 * # Design
 *
 * The arrival count and the current generation must change together, so
 * both live under one `parking_lot::Mutex` with a `WaitSet` for parked
 * parties. Each round is a [`Generation`]; a waiter that finds the
 * generation it captured on arrival replaced knows its round tripped.
 *
 * The last arrival runs the barrier action while still holding the mutex,
 * before the next generation starts, so the action can merge per-party
 * results without further synchronization.
 *
 * A party that is interrupted or times out breaks the generation for
 * everyone: a missing party means the rendezvous can never complete.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::park;
use crate::core::sync::wait::{WaitOutcome, WaitSet};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// One round of the barrier
#[derive(Debug)]
struct Generation {
    id: u64,
    broken: AtomicBool,
}

impl Generation {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            broken: AtomicBool::new(false),
        })
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

struct BarrierState {
    /// Parties still expected in the current generation
    count: usize,
    generation: Arc<Generation>,
}

pub struct CyclicBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    trip: WaitSet,
    action: Option<BarrierAction>,
}

impl CyclicBarrier {
    pub fn new(parties: usize) -> SyncResult<Self> {
        Self::build(parties, None)
    }

    /// Barrier whose `action` runs once per trip, by the last arriving party
    pub fn with_action<F>(parties: usize, action: F) -> SyncResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<BarrierAction>) -> SyncResult<Self> {
        if parties == 0 {
            return Err(SyncError::illegal_argument("parties must be positive"));
        }
        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                count: parties,
                generation: Generation::new(0),
            }),
            trip: WaitSet::new(),
            action,
        })
    }

    /// Wait for all parties. Returns the arrival index: `parties - 1` for
    /// the first to arrive, `0` for the last.
    pub fn await_(&self) -> SyncResult<usize> {
        // Untimed waits never expire.
        self.dowait(None).map(|arrival| arrival.unwrap_or(0))
    }

    /// Like [`await_`](Self::await_) with a bound. `Ok(None)` when the
    /// timeout elapsed; the barrier is then broken for every party.
    pub fn await_timeout(&self, timeout: Duration) -> SyncResult<Option<usize>> {
        self.dowait(Some(park::deadline_after(timeout)))
    }

    fn dowait(&self, deadline: Option<Instant>) -> SyncResult<Option<usize>> {
        let mut state = self.state.lock();
        let generation = Arc::clone(&state.generation);

        if generation.is_broken() {
            return Err(SyncError::BrokenBarrier);
        }
        if park::interrupted() {
            self.break_barrier(&mut state);
            return Err(SyncError::Interrupted);
        }

        state.count -= 1;
        let index = state.count;
        if index == 0 {
            self.trip_barrier(state);
            return Ok(Some(0));
        }

        loop {
            let outcome = match deadline {
                Some(deadline) => self.trip.wait_until(&mut state, deadline),
                None => self.trip.wait(&mut state),
            };

            if outcome == WaitOutcome::Interrupted {
                if Arc::ptr_eq(&generation, &state.generation) && !generation.is_broken() {
                    self.break_barrier(&mut state);
                    return Err(SyncError::Interrupted);
                }
                // The round already ended; keep the interrupt for the caller's next wait.
                park::self_interrupt();
            }

            if generation.is_broken() {
                return Err(SyncError::BrokenBarrier);
            }
            if !Arc::ptr_eq(&generation, &state.generation) {
                return Ok(Some(index));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.break_barrier(&mut state);
                    return Ok(None);
                }
            }
        }
    }

    /// Last arrival: run the action, then open the next generation
    fn trip_barrier(&self, mut state: MutexGuard<'_, BarrierState>) {
        if let Some(action) = &self.action {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| action())) {
                self.break_barrier(&mut state);
                drop(state);
                panic::resume_unwind(panic);
            }
        }
        debug!(generation = state.generation.id, parties = self.parties, "barrier tripped");
        self.next_generation(&mut state);
    }

    fn next_generation(&self, state: &mut BarrierState) {
        self.trip.notify_all();
        state.count = self.parties;
        state.generation = Generation::new(state.generation.id + 1);
    }

    fn break_barrier(&self, state: &mut BarrierState) {
        state.generation.broken.store(true, Ordering::Release);
        state.count = self.parties;
        self.trip.notify_all();
        debug!(generation = state.generation.id, "barrier broken");
    }

    /// Break the current generation (waiting parties see `BrokenBarrier`)
    /// and start a fresh one.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.break_barrier(&mut state);
        self.next_generation(&mut state);
        debug!(generation = state.generation.id, "barrier reset");
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().generation.is_broken()
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties currently waiting in this generation
    pub fn number_waiting(&self) -> usize {
        self.parties - self.state.lock().count
    }
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("waiting", &(self.parties - state.count))
            .field("generation", &state.generation.id)
            .field("broken", &state.generation.is_broken())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_zero_parties_rejected() {
        assert!(matches!(
            CyclicBarrier::new(0),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_single_party_trips_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let barrier = CyclicBarrier::with_action(1, move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(barrier.await_().unwrap(), 0);
        assert_eq!(barrier.await_().unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_arrival_indices_are_distinct() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.await_().unwrap())
            })
            .collect();

        let mut indices: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[test]
    fn test_timeout_breaks_barrier() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let barrier_clone = barrier.clone();
        let other = thread::spawn(move || barrier_clone.await_());

        while barrier.number_waiting() < 1 {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            barrier.await_timeout(Duration::from_millis(30)).unwrap(),
            None
        );
        assert_eq!(other.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(barrier.is_broken());

        barrier.reset();
        assert!(!barrier.is_broken());
    }

    #[test]
    fn test_interrupt_breaks_for_everyone() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let (tx, rx) = mpsc::channel();

        let barrier_a = barrier.clone();
        let victim = thread::spawn(move || {
            tx.send(park::current()).unwrap();
            barrier_a.await_()
        });
        let barrier_b = barrier.clone();
        let bystander = thread::spawn(move || {
            while barrier_b.number_waiting() < 1 {
                thread::sleep(Duration::from_millis(5));
            }
            barrier_b.await_()
        });

        let target = rx.recv().unwrap();
        while barrier.number_waiting() < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        target.interrupt();

        let mut results = vec![victim.join().unwrap(), bystander.join().unwrap()];
        results.sort_by_key(|r| matches!(r, Err(SyncError::BrokenBarrier)));
        assert_eq!(
            results,
            vec![Err(SyncError::Interrupted), Err(SyncError::BrokenBarrier)]
        );
        assert_eq!(barrier.await_(), Err(SyncError::BrokenBarrier));
    }

    #[test]
    fn test_panicking_action_breaks_barrier() {
        let barrier = Arc::new(CyclicBarrier::with_action(2, || panic!("merge failed")).unwrap());
        let barrier_clone = barrier.clone();
        let waiter = thread::spawn(move || barrier_clone.await_());

        while barrier.number_waiting() < 1 {
            thread::sleep(Duration::from_millis(5));
        }
        let barrier_clone = barrier.clone();
        let tripper = thread::spawn(move || barrier_clone.await_());

        assert!(tripper.join().is_err());
        assert_eq!(waiter.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(barrier.is_broken());
    }
}
