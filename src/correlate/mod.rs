pub mod stats;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::store::signature::StackSignature;
use crate::store::{StackCountersHandle, StackStore};
use crate::trace::event::{
    AllocEvent, FreeEvent, HeapEvent, ReAllocEvent, StackCaptureEvent,
};

use self::stats::{Anomaly, CorrelationStats};

/// An allocation observed but not yet freed.
///
/// `stack` stays empty until the stack capture for this allocation arrives
/// on the owning thread; it is set at most once. The whole record is
/// consumed by the matching free.
struct PendingAllocation {
    /// Thread that performed the allocation. Only a capture from this
    /// thread may attach frames.
    tid: u32,
    size: u64,
    stack: Option<StackCountersHandle>,
}

/// Correlates the ordered heap event stream and drives the stack store.
///
/// Single-writer by design: the address registry and per-thread pointers
/// are plain maps mutated only from the session run loop. The store it
/// writes into is the concurrently-queryable side.
///
/// All lookup state is keyed by process id, so streams carrying more than
/// one process never collide on reused virtual addresses or thread ids.
///
/// Anomalies (duplicate addresses, frees with no live allocation) never
/// stop the stream; they are counted and the affected event is dropped or
/// its stale state replaced.
pub struct Correlator {
    store: Arc<StackStore>,
    stats: Arc<CorrelationStats>,
    /// Live allocations keyed by (pid, address), awaiting their free.
    live: HashMap<(u32, u64), PendingAllocation>,
    /// Most recent un-stacked allocation address per (pid, tid), awaiting
    /// the next stack capture. Overwritten on alloc, cleared when the
    /// allocation it references is freed.
    last_alloc_by_tid: HashMap<(u32, u32), u64>,
}

impl Correlator {
    /// Creates a correlator writing into `store`, counting anomalies into
    /// `stats`.
    pub fn new(store: Arc<StackStore>, stats: Arc<CorrelationStats>) -> Self {
        Self {
            store,
            stats,
            live: HashMap::new(),
            last_alloc_by_tid: HashMap::new(),
        }
    }

    /// Applies one event from the stream.
    pub fn handle_event(&mut self, event: HeapEvent) {
        match event {
            HeapEvent::Alloc(e) => self.handle_alloc(e),
            HeapEvent::StackCapture(e) => self.handle_stack_capture(e),
            HeapEvent::Free(e) => self.handle_free(e),
            HeapEvent::ReAlloc(e) => self.handle_realloc(e),
        }
    }

    fn handle_alloc(&mut self, e: AllocEvent) {
        let pending = PendingAllocation {
            tid: e.tid,
            size: e.size,
            stack: None,
        };

        if self.live.insert((e.pid, e.address), pending).is_some() {
            // A live entry at this address means a missed free or an
            // external double-allocation; the stale record is replaced
            // and its correlation is lost.
            self.stats.record(Anomaly::DuplicateAllocation);
            debug!(pid = e.pid, address = e.address, tid = e.tid, "replacing stale allocation entry");
        }

        self.last_alloc_by_tid.insert((e.pid, e.tid), e.address);
    }

    fn handle_stack_capture(&mut self, e: StackCaptureEvent) {
        let Some(address) = self.last_alloc_by_tid.get(&(e.pid, e.tid)).copied() else {
            self.stats.record(Anomaly::OrphanStackCapture);
            return;
        };

        let Some(pending) = self.live.get_mut(&(e.pid, address)) else {
            // The allocation this pointer referenced was already freed.
            self.last_alloc_by_tid.remove(&(e.pid, e.tid));
            self.stats.record(Anomaly::OrphanStackCapture);
            return;
        };

        if pending.tid != e.tid {
            // The address was reclaimed by another thread's allocation
            // after this thread's record was replaced. The pointer is
            // stale; attaching here would charge frames to the wrong
            // allocation.
            self.last_alloc_by_tid.remove(&(e.pid, e.tid));
            self.stats.record(Anomaly::OrphanStackCapture);
            return;
        }

        if pending.stack.is_some() {
            // Not the capture for a fresh allocation; nothing to attach.
            self.stats.record(Anomaly::OrphanStackCapture);
            return;
        }

        let signature = StackSignature::new(e.addresses);
        let handle = self.store.record_allocation(e.pid, signature, pending.size);
        pending.stack = Some(handle);
    }

    fn handle_free(&mut self, e: FreeEvent) {
        let Some(pending) = self.live.remove(&(e.pid, e.address)) else {
            self.stats.record(Anomaly::UntrackedFree);
            debug!(pid = e.pid, address = e.address, tid = e.tid, "free for untracked address");
            return;
        };

        // Invalidate the owner thread's pointer so a later capture cannot
        // attach to whatever reuses this address.
        if self.last_alloc_by_tid.get(&(e.pid, pending.tid)) == Some(&e.address) {
            self.last_alloc_by_tid.remove(&(e.pid, pending.tid));
        }

        match pending.stack {
            Some(handle) => {
                self.store.record_free(e.pid, handle.signature(), pending.size);
            }
            None => {
                // Freed before its stack was ever captured; charged to no
                // stack (conservative drop).
                self.stats.record(Anomaly::UnstackedFree);
            }
        }
    }

    fn handle_realloc(&mut self, e: ReAllocEvent) {
        // Deliberately uncorrelated: the facility reports the paired
        // alloc/free alongside the realloc in common configurations.
        self.stats.record(Anomaly::ReallocIgnored);
        debug!(
            pid = e.pid,
            old_address = e.old_address,
            new_address = e.new_address,
            "realloc passed through uncorrelated",
        );
    }

    /// Number of allocations currently awaiting their free.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Number of threads with an allocation awaiting its stack capture.
    pub fn tracked_threads(&self) -> usize {
        self.last_alloc_by_tid.len()
    }
}
