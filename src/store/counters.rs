use std::sync::atomic::{AtomicU64, Ordering};

/// Allocation/free tallies for one call stack within one process.
///
/// All four fields are monotonically non-decreasing for the lifetime of the
/// counters (the store discards whole entries on `clear`, it never resets
/// them in place). All operations are atomic and safe for concurrent use;
/// `snapshot` reads each field independently, so a reader racing a writer
/// may observe a free without its matching allocation. That weak view is
/// accepted: reports are "as of roughly now".
pub struct StackCounters {
    allocate_count: AtomicU64,
    allocate_size: AtomicU64,
    free_count: AtomicU64,
    free_size: AtomicU64,
}

impl StackCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self {
            allocate_count: AtomicU64::new(0),
            allocate_size: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            free_size: AtomicU64::new(0),
        }
    }

    /// Records one allocation of `size` bytes.
    pub fn record_allocation(&self, size: u64) {
        self.allocate_count.fetch_add(1, Ordering::Relaxed);
        self.allocate_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Records one free of `size` bytes.
    pub fn record_free(&self, size: u64) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
        self.free_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Returns a point-in-time view of all four tallies.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            allocate_count: self.allocate_count.load(Ordering::Relaxed),
            allocate_size: self.allocate_size.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
            free_size: self.free_size.load(Ordering::Relaxed),
        }
    }
}

impl Default for StackCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one stack's tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub allocate_count: u64,
    pub allocate_size: u64,
    pub free_count: u64,
    pub free_size: u64,
}

impl CountersSnapshot {
    /// Allocations not yet freed. Clamped to zero when frees outnumber
    /// allocations (possible under racy snapshots or lost correlation);
    /// never wraps.
    pub fn outstanding_count(&self) -> u64 {
        self.allocate_count.saturating_sub(self.free_count)
    }

    /// Bytes not yet freed, clamped like `outstanding_count`.
    pub fn outstanding_size(&self) -> u64 {
        self.allocate_size.saturating_sub(self.free_size)
    }
}
