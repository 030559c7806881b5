use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation anomalies counted instead of aborting the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Anomaly {
    /// An allocation address arrived while a previous allocation at the
    /// same address was still live; the stale entry was replaced.
    DuplicateAllocation = 0,
    /// A free referenced an address with no live allocation.
    UntrackedFree = 1,
    /// A stack capture arrived with no pending allocation to attach to,
    /// or for one that already had its stack.
    OrphanStackCapture = 2,
    /// An allocation was freed before its stack was ever captured; the
    /// free was charged to no stack.
    UnstackedFree = 3,
    /// A realloc event was passed through uncorrelated.
    ReallocIgnored = 4,
}

/// Number of Anomaly variants, used for array sizing.
pub const ANOMALY_CARDINALITY: usize = 5;

impl Anomaly {
    /// Returns the canonical log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateAllocation => "duplicate_allocation",
            Self::UntrackedFree => "untracked_free",
            Self::OrphanStackCapture => "orphan_stack_capture",
            Self::UnstackedFree => "unstacked_free",
            Self::ReallocIgnored => "realloc_ignored",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::DuplicateAllocation),
            1 => Some(Self::UntrackedFree),
            2 => Some(Self::OrphanStackCapture),
            3 => Some(Self::UnstackedFree),
            4 => Some(Self::ReallocIgnored),
            _ => None,
        }
    }

    /// Return all anomaly kinds in numeric order.
    pub fn all() -> &'static [Self] {
        &[
            Self::DuplicateAllocation,
            Self::UntrackedFree,
            Self::OrphanStackCapture,
            Self::UnstackedFree,
            Self::ReallocIgnored,
        ]
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free counters for correlation anomalies.
pub struct CorrelationStats {
    counts: [AtomicU64; ANOMALY_CARDINALITY],
}

impl CorrelationStats {
    /// Create a new zeroed CorrelationStats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increment the counter for the given anomaly by one.
    pub fn record(&self, anomaly: Anomaly) {
        if let Some(counter) = self.counts.get(anomaly as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current count for one anomaly, without resetting.
    pub fn count(&self, anomaly: Anomaly) -> u64 {
        self.counts
            .get(anomaly as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> Vec<(Anomaly, u64)> {
        let mut result = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(anomaly) = Anomaly::from_u8(i as u8) {
                    result.push((anomaly, v));
                }
            }
        }

        result
    }
}

impl Default for CorrelationStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_roundtrip() {
        for i in 0..ANOMALY_CARDINALITY as u8 {
            let anomaly = Anomaly::from_u8(i).expect("valid anomaly");
            assert_eq!(anomaly as u8, i);
        }
        assert!(Anomaly::from_u8(5).is_none());
    }

    #[test]
    fn test_record_count_and_snapshot() {
        let stats = CorrelationStats::new();
        stats.record(Anomaly::UntrackedFree);
        stats.record(Anomaly::UntrackedFree);
        stats.record(Anomaly::ReallocIgnored);

        assert_eq!(stats.count(Anomaly::UntrackedFree), 2);
        assert_eq!(stats.count(Anomaly::DuplicateAllocation), 0);

        let snap = stats.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.contains(&(Anomaly::UntrackedFree, 2)));
        assert!(snap.contains(&(Anomaly::ReallocIgnored, 1)));

        // Snapshot resets.
        assert_eq!(stats.count(Anomaly::UntrackedFree), 0);
    }
}
