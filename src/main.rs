/*!
 * AI-OS Sync - Demo Entry Point
 *
 * Runs three coordination scenarios against the library:
 * - Start/done latch driver with a fixed worker crew
 * - Resource pool admitted through a fair semaphore
 * - Row-parallel matrix pass merged by a barrier action
 */

use ai_os_sync::{
    init_tracing, span_scenario, ArrayBlockingQueue, CountDownLatch, CyclicBarrier, Fairness,
    QueueConfig, Semaphore, StripedConfig, StripedCounter,
};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

const LATCH_WORKERS: usize = 10;
const POOL_SIZE: usize = 3;
const POOL_CLIENTS: usize = 8;
const MATRIX_ROWS: usize = 4;
const MATRIX_COLS: usize = 6;
const MATRIX_PASSES: usize = 2;

fn join_all<T>(handles: Vec<JoinHandle<T>>) -> Result<Vec<T>> {
    handles
        .into_iter()
        .map(|handle| handle.join().map_err(|_| anyhow!("worker thread panicked")))
        .collect()
}

/// Workers block on a start gate, do their share, and report through a done gate
fn run_latch_driver(parallelism: usize) -> Result<()> {
    let scenario = span_scenario("latch_driver");
    scenario.record_threads(LATCH_WORKERS);
    let _entered = scenario.span().enter();

    let start_signal = Arc::new(CountDownLatch::new(1)?);
    let done_signal = Arc::new(CountDownLatch::new(LATCH_WORKERS as i64)?);
    let work_done = Arc::new(StripedCounter::new(parallelism)?);

    let handles: Vec<_> = (0..LATCH_WORKERS)
        .map(|worker| {
            let start_signal = Arc::clone(&start_signal);
            let done_signal = Arc::clone(&done_signal);
            let work_done = Arc::clone(&work_done);
            thread::Builder::new()
                .name(format!("latch-worker-{worker}"))
                .spawn(move || -> ai_os_sync::SyncResult<()> {
                    start_signal.await_()?;
                    for _ in 0..1_000 {
                        work_done.increment();
                    }
                    done_signal.count_down();
                    Ok(())
                })
                .context("spawning latch worker")
        })
        .collect::<Result<_>>()?;

    debug!(workers = LATCH_WORKERS, "releasing start gate");
    start_signal.count_down();
    done_signal.await_()?;

    for outcome in join_all(handles)? {
        outcome?;
    }
    info!(
        work = work_done.sum(),
        stripes = work_done.stripe_count(),
        done = %done_signal,
        "latch driver finished"
    );
    drop(_entered);
    scenario.finish(work_done.sum() == (LATCH_WORKERS * 1_000) as i64);
    Ok(())
}

/// Clients share a small pool; the semaphore admits at most `POOL_SIZE` at once
fn run_semaphore_pool(parallelism: usize) -> Result<()> {
    let scenario = span_scenario("semaphore_pool");
    scenario.record_threads(POOL_CLIENTS);
    let _entered = scenario.span().enter();

    let permits = Arc::new(Semaphore::new(POOL_SIZE as i64, Fairness::Fair)?);
    let config = QueueConfig::fair(POOL_SIZE);
    debug!(config = %serde_json::to_string(&config)?, "pool slot queue");
    let slots = Arc::new(ArrayBlockingQueue::from_config(config)?);
    for slot in 0..POOL_SIZE {
        slots.put(slot)?;
    }
    let checkouts = Arc::new(StripedCounter::from_config(
        StripedConfig::with_parallelism(parallelism),
    )?);

    let handles: Vec<_> = (0..POOL_CLIENTS)
        .map(|client| {
            let permits = Arc::clone(&permits);
            let slots = Arc::clone(&slots);
            let checkouts = Arc::clone(&checkouts);
            thread::Builder::new()
                .name(format!("pool-client-{client}"))
                .spawn(move || -> ai_os_sync::SyncResult<()> {
                    for _ in 0..5 {
                        permits.acquire()?;
                        let slot = slots.take()?;
                        checkouts.increment();
                        thread::sleep(Duration::from_millis(2));
                        slots.put(slot)?;
                        permits.release()?;
                    }
                    Ok(())
                })
                .context("spawning pool client")
        })
        .collect::<Result<_>>()?;

    for outcome in join_all(handles)? {
        outcome?;
    }
    info!(
        checkouts = checkouts.sum(),
        permits = %permits,
        free_slots = ?slots.to_vec(),
        "semaphore pool finished"
    );
    drop(_entered);
    scenario.finish(permits.available_permits() == POOL_SIZE as i64);
    Ok(())
}

/// One thread per row; the barrier action merges row sums after every pass
fn run_barrier_matrix() -> Result<()> {
    let scenario = span_scenario("barrier_matrix");
    scenario.record_threads(MATRIX_ROWS);
    let _entered = scenario.span().enter();

    let matrix: Arc<Vec<Vec<i64>>> = Arc::new(
        (0..MATRIX_ROWS)
            .map(|row| (0..MATRIX_COLS).map(|col| (row * MATRIX_COLS + col) as i64).collect())
            .collect(),
    );
    let row_sums = Arc::new(Mutex::new(vec![0i64; MATRIX_ROWS]));
    let totals = Arc::new(Mutex::new(Vec::with_capacity(MATRIX_PASSES)));

    let merge_sums = Arc::clone(&row_sums);
    let merge_totals = Arc::clone(&totals);
    let barrier = Arc::new(CyclicBarrier::with_action(MATRIX_ROWS, move || {
        let total: i64 = merge_sums.lock().iter().sum();
        merge_totals.lock().push(total);
        debug!(total, "rows merged");
    })?);

    let handles: Vec<_> = (0..MATRIX_ROWS)
        .map(|row| {
            let matrix = Arc::clone(&matrix);
            let row_sums = Arc::clone(&row_sums);
            let barrier = Arc::clone(&barrier);
            thread::Builder::new()
                .name(format!("matrix-row-{row}"))
                .spawn(move || -> ai_os_sync::SyncResult<()> {
                    for pass in 1..=MATRIX_PASSES {
                        let sum: i64 = matrix[row].iter().map(|v| v * pass as i64).sum();
                        row_sums.lock()[row] = sum;
                        barrier.await_()?;
                    }
                    Ok(())
                })
                .context("spawning matrix row worker")
        })
        .collect::<Result<_>>()?;

    for outcome in join_all(handles)? {
        outcome?;
    }
    let totals = totals.lock().clone();
    info!(?totals, broken = barrier.is_broken(), "barrier matrix finished");
    drop(_entered);
    scenario.finish(totals.len() == MATRIX_PASSES);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing().context("installing tracing subscriber")?;

    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    info!(parallelism, "AI-OS sync demo starting");

    run_latch_driver(parallelism)?;
    run_semaphore_pool(parallelism)?;
    run_barrier_matrix()?;

    info!("AI-OS sync demo finished");
    Ok(())
}
