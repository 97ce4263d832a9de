/*!
 * Synchronization Limits and Constants
 *
 * Centralized location for tuning thresholds and magic numbers used by
 * the blocking primitives. Performance-critical constants are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// TIMED WAITS
// =============================================================================

/// Remaining budget below which timed acquisition spins instead of parking (1µs)
/// [PERF] Parking and unparking costs more than the wait itself at this scale
pub const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1_000);

// =============================================================================
// ITERATOR REGISTRY
// =============================================================================

/// Registry entries scanned when a new iterator registers
/// [PERF] Keeps registration O(1)
pub const SHORT_SWEEP_SCANS: usize = 4;

/// Registry entries scanned after an iterator detaches itself
pub const LONG_SWEEP_SCANS: usize = 16;

// =============================================================================
// STRIPED COUNTER
// =============================================================================

/// Initial cell table length once contention is first observed
pub const INITIAL_STRIPES: usize = 2;

/// Golden-ratio increment used to spread per-thread hash seeds
pub const HASH_SEED_INCREMENT: u32 = 0x9e37_79b9;
