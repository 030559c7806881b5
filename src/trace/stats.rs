use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventKind, MAX_EVENT_KIND};

/// Lock-free per-EventKind counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct EventStats {
    counts: [AtomicU64; MAX_EVENT_KIND + 1],
}

impl EventStats {
    /// Create a new zeroed EventStats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increment the counter for the given event kind by one.
    pub fn record(&self, kind: EventKind) {
        if let Some(counter) = self.counts.get(kind as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> Vec<(EventKind, u64)> {
        let mut result = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(kind) = EventKind::from_u8(i as u8) {
                    result.push((kind, v));
                }
            }
        }

        result
    }
}

impl Default for EventStats {
    fn default() -> Self {
        Self::new()
    }
}
