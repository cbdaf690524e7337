//! Counters reported by the engine. Purely observational.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub const CLUSTERED_VARIANTS_CREATED: &str = "clustered_variants_created";
pub const CLUSTERED_VARIANTS_MERGED: &str = "clustered_variants_merged";
pub const CLUSTERED_VARIANTS_MERGE_OPERATIONS: &str = "clustered_variants_merge_operations";
pub const CLUSTERED_VARIANTS_RS_SPLIT: &str = "clustered_variants_rs_split";
pub const CLUSTERED_VARIANTS_UPDATED: &str = "clustered_variants_updated";
pub const CLUSTERED_VARIANTS_DEPRECATED: &str = "clustered_variants_deprecated";
pub const CLUSTERED_VARIANTS_INVARIANT_VIOLATIONS: &str =
    "clustered_variants_invariant_violations";
pub const SUBMITTED_VARIANTS_CREATED: &str = "submitted_variants_created";
pub const SUBMITTED_VARIANTS_UPDATED_RS: &str = "submitted_variants_updated_rs";
pub const SUBMITTED_VARIANTS_UPDATE_OPERATIONS: &str = "submitted_variants_update_operations";
pub const SUBMITTED_VARIANTS_SS_SPLIT: &str = "submitted_variants_ss_split";
pub const SUBMITTED_VARIANTS_KEPT_UNCLUSTERED: &str = "submitted_variants_kept_unclustered";
pub const SUBMITTED_VARIANTS_INVALID: &str = "submitted_variants_invalid";

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, by: u64);
}

/// In-memory counters.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> u64 {
        self.with_counts(|counts| counts.get(name).copied().unwrap_or(0))
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.with_counts(|counts| counts.clone())
    }

    /// Move every count into `sink`, leaving this collector empty.
    pub fn drain_into(&self, sink: &dyn MetricsSink) {
        let drained = self.with_counts(std::mem::take);
        for (name, by) in drained {
            sink.increment(&name, by);
        }
    }

    fn with_counts<T>(&self, f: impl FnOnce(&mut BTreeMap<String, u64>) -> T) -> T {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut counts)
    }
}

impl MetricsSink for CounterMetrics {
    fn increment(&self, name: &str, by: u64) {
        if by == 0 {
            return;
        }
        self.with_counts(|counts| *counts.entry(name.to_string()).or_insert(0) += by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_moves_counts() {
        let chunk = CounterMetrics::new();
        chunk.increment(CLUSTERED_VARIANTS_CREATED, 2);
        chunk.increment(CLUSTERED_VARIANTS_CREATED, 1);
        chunk.increment(SUBMITTED_VARIANTS_INVALID, 0);

        let job = CounterMetrics::new();
        job.increment(CLUSTERED_VARIANTS_CREATED, 4);
        chunk.drain_into(&job);

        assert_eq!(job.get(CLUSTERED_VARIANTS_CREATED), 7);
        assert!(chunk.snapshot().is_empty());
        assert!(!job.snapshot().contains_key(SUBMITTED_VARIANTS_INVALID));
    }
}
