pub mod counters;
pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use self::counters::{CountersSnapshot, StackCounters};
use self::signature::StackSignature;

/// Non-owning reference to one stack's counters inside the store.
///
/// Held by the correlator on a pending allocation so the eventual free can
/// be charged back to the right stack without re-probing the map.
#[derive(Clone)]
pub struct StackCountersHandle {
    signature: StackSignature,
    counters: Arc<StackCounters>,
}

impl StackCountersHandle {
    /// The signature this handle's counters belong to.
    pub fn signature(&self) -> &StackSignature {
        &self.signature
    }

    /// The shared counters object.
    pub fn counters(&self) -> &StackCounters {
        &self.counters
    }
}

/// Read-only projection of one aggregated stack, detached from the store.
#[derive(Debug, Clone)]
pub struct AggregatedStackView {
    pub pid: u32,
    pub signature: StackSignature,
    pub counters: CountersSnapshot,
}

/// Per-process signature table.
#[derive(Default)]
struct ProcessStacks {
    stacks: DashMap<StackSignature, Arc<StackCounters>>,
}

/// Concurrent two-level aggregation of call stacks: process id to signature
/// to counters.
///
/// Both levels use `DashMap`, so every mutation is an upsert-or-increment
/// under a per-shard lock; there is no global lock serializing the query
/// path against the event path. Readers get per-entry snapshot consistency
/// only: a query racing a writer may see the allocation side of a burst
/// without its free side.
pub struct StackStore {
    processes: DashMap<u32, ProcessStacks>,
}

impl StackStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Records one allocation of `size` bytes against `(pid, signature)`,
    /// creating the entry if this is the first sighting, and returns a
    /// handle to the live counters.
    pub fn record_allocation(
        &self,
        pid: u32,
        signature: StackSignature,
        size: u64,
    ) -> StackCountersHandle {
        let counters = self.counters_entry(pid, &signature);
        counters.record_allocation(size);
        StackCountersHandle {
            signature,
            counters,
        }
    }

    /// Records one free of `size` bytes against `(pid, signature)`.
    ///
    /// Upsert semantics mirror the allocation side: a free for a
    /// never-seen process or stack creates the entry lazily with only its
    /// free side populated rather than failing. The resulting outstanding
    /// value clamps to zero.
    pub fn record_free(&self, pid: u32, signature: &StackSignature, size: u64) {
        let counters = self.counters_entry(pid, signature);
        counters.record_free(size);
    }

    /// Looks up or creates the counters for `(pid, signature)`.
    fn counters_entry(&self, pid: u32, signature: &StackSignature) -> Arc<StackCounters> {
        let process = self.processes.entry(pid).or_default();
        let entry = process
            .stacks
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(StackCounters::new()));
        Arc::clone(entry.value())
    }

    /// Returns up to `limit` stacks across all processes, filtered to
    /// `outstanding_count >= min_outstanding` and ordered by outstanding
    /// count descending.
    ///
    /// Ties break on pid, then on the address sequence, so repeated calls
    /// against unchanged state return identical output.
    pub fn top_stacks(&self, limit: usize, min_outstanding: u64) -> Vec<AggregatedStackView> {
        let mut views: Vec<AggregatedStackView> = self
            .iter_views()
            .filter(|v| v.counters.outstanding_count() >= min_outstanding)
            .collect();

        views.sort_by(|a, b| {
            b.counters
                .outstanding_count()
                .cmp(&a.counters.outstanding_count())
                .then_with(|| a.pid.cmp(&b.pid))
                .then_with(|| a.signature.addresses().cmp(b.signature.addresses()))
        });
        views.truncate(limit);
        views
    }

    /// Full unfiltered dump, grouped by process id.
    pub fn all_stacks_by_process(&self) -> HashMap<u32, Vec<AggregatedStackView>> {
        let mut result: HashMap<u32, Vec<AggregatedStackView>> =
            HashMap::with_capacity(self.processes.len());

        for process in self.processes.iter() {
            let pid = *process.key();
            let mut views: Vec<AggregatedStackView> = process
                .value()
                .stacks
                .iter()
                .map(|entry| AggregatedStackView {
                    pid,
                    signature: entry.key().clone(),
                    counters: entry.value().snapshot(),
                })
                .collect();
            // Deterministic within a snapshot regardless of shard layout.
            views.sort_by(|a, b| a.signature.addresses().cmp(b.signature.addresses()));
            result.insert(pid, views);
        }

        result
    }

    /// Discards every process and stack entry. Handles and views already
    /// given out stay valid; they just no longer feed any query.
    pub fn clear(&self) {
        self.processes.clear();
    }

    /// Number of processes with at least one recorded stack.
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    fn iter_views(&self) -> impl Iterator<Item = AggregatedStackView> + '_ {
        self.processes.iter().flat_map(|process| {
            let pid = *process.key();
            process
                .value()
                .stacks
                .iter()
                .map(move |entry| AggregatedStackView {
                    pid,
                    signature: entry.key().clone(),
                    counters: entry.value().snapshot(),
                })
                .collect::<Vec<_>>()
        })
    }
}

impl Default for StackStore {
    fn default() -> Self {
        Self::new()
    }
}
