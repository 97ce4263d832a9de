/*!
 * Synchronization Configuration
 *
 * Construction-time configuration for the blocking primitives. Every value
 * is fixed when a primitive is built; nothing here is consulted afterwards,
 * and nothing is read from process-global state.
 */

use serde::{Deserialize, Serialize};

/// Admission policy for lock-style primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fairness {
    /// Arriving threads may barge ahead of queued ones (higher throughput)
    #[default]
    NonFair,
    /// Queued threads are admitted in strict FIFO order
    Fair,
}

impl Fairness {
    #[inline(always)]
    pub const fn is_fair(self) -> bool {
        matches!(self, Fairness::Fair)
    }
}

impl From<bool> for Fairness {
    fn from(fair: bool) -> Self {
        if fair {
            Fairness::Fair
        } else {
            Fairness::NonFair
        }
    }
}

/// Bounded queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Fixed number of slots in the ring buffer
    pub capacity: usize,
    /// Lock hand-off policy
    #[serde(default)]
    pub fairness: Fairness,
}

impl QueueConfig {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            fairness: Fairness::NonFair,
        }
    }

    pub const fn fair(capacity: usize) -> Self {
        Self {
            capacity,
            fairness: Fairness::Fair,
        }
    }
}

/// Striped counter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripedConfig {
    /// Upper bound hint for concurrent updaters (typically hardware threads).
    /// The cell table never grows past the next power of two of this value.
    pub parallelism: usize,
}

impl StripedConfig {
    pub const fn with_parallelism(parallelism: usize) -> Self {
        Self { parallelism }
    }

    /// Configuration for a counter that is rarely contended
    pub const fn low_contention() -> Self {
        Self { parallelism: 2 }
    }

    /// Largest cell table this configuration allows
    pub fn max_stripes(&self) -> usize {
        self.parallelism.max(1).next_power_of_two()
    }
}
