/*!
 * Lock-Free Synchronization Primitives
 *
 * Primitives that never block their callers:
 * - Striped counter: CAS on a shared base, spilling to per-thread cells
 *   under contention
 */

mod striped_counter;

// Re-export public API
pub use striped_counter::StripedCounter;
