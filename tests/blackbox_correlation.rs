//! End-to-end correlation scenarios driving the correlator and store
//! directly, plus session lifecycle coverage through the async path.

use std::sync::Arc;

use leakwatch::config::Config;
use leakwatch::correlate::stats::{Anomaly, CorrelationStats};
use leakwatch::correlate::Correlator;
use leakwatch::session::{Session, SessionError};
use leakwatch::store::signature::StackSignature;
use leakwatch::store::StackStore;
use leakwatch::trace::event::{AllocEvent, FreeEvent, HeapEvent, StackCaptureEvent};

fn alloc(tid: u32, address: u64, size: u64) -> HeapEvent {
    HeapEvent::Alloc(AllocEvent {
        pid: 1000,
        tid,
        address,
        size,
    })
}

fn capture(tid: u32, addresses: &[u64]) -> HeapEvent {
    HeapEvent::StackCapture(StackCaptureEvent {
        pid: 1000,
        tid,
        addresses: addresses.to_vec(),
    })
}

fn free(tid: u32, address: u64) -> HeapEvent {
    HeapEvent::Free(FreeEvent {
        pid: 1000,
        tid,
        address,
    })
}

fn pipeline() -> (Correlator, Arc<StackStore>, Arc<CorrelationStats>) {
    let store = Arc::new(StackStore::new());
    let stats = Arc::new(CorrelationStats::new());
    let correlator = Correlator::new(Arc::clone(&store), Arc::clone(&stats));
    (correlator, store, stats)
}

#[test]
fn test_leaking_stack_rises_to_the_top() {
    let (mut correlator, store, _stats) = pipeline();

    // The "leaky" stack allocates ten times and frees twice.
    for i in 0..10u64 {
        correlator.handle_event(alloc(1, 0x1000 + i, 128));
        correlator.handle_event(capture(1, &[0xDEAD, 0xBEEF]));
    }
    correlator.handle_event(free(1, 0x1000));
    correlator.handle_event(free(1, 0x1001));

    // A well-behaved stack allocates and frees everything.
    for i in 0..20u64 {
        correlator.handle_event(alloc(2, 0x2000 + i, 64));
        correlator.handle_event(capture(2, &[0xCAFE]));
    }
    for i in 0..20u64 {
        correlator.handle_event(free(2, 0x2000 + i));
    }

    let top = store.top_stacks(1, 0);
    assert_eq!(top[0].signature.addresses(), &[0xDEAD, 0xBEEF]);
    assert_eq!(top[0].counters.outstanding_count(), 8);
    assert_eq!(top[0].counters.outstanding_size(), 8 * 128);
}

#[test]
fn test_min_outstanding_filters_balanced_stacks() {
    let (mut correlator, store, _stats) = pipeline();

    correlator.handle_event(alloc(1, 0x100, 8));
    correlator.handle_event(capture(1, &[0xAA]));
    correlator.handle_event(free(1, 0x100));

    for i in 0..3u64 {
        correlator.handle_event(alloc(1, 0x200 + i, 8));
        correlator.handle_event(capture(1, &[0xBB]));
    }

    let filtered = store.top_stacks(10, 1);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].signature.addresses(), &[0xBB]);

    let unfiltered = store.top_stacks(10, 0);
    assert_eq!(unfiltered.len(), 2);
}

#[test]
fn test_interleaved_threads_keep_stacks_apart() {
    let (mut correlator, store, _stats) = pipeline();

    // Allocations and captures from two threads interleave arbitrarily;
    // the per-thread pointer keeps each capture with its own allocation.
    correlator.handle_event(alloc(1, 0x100, 16));
    correlator.handle_event(alloc(2, 0x200, 32));
    correlator.handle_event(capture(1, &[0x11]));
    correlator.handle_event(capture(2, &[0x22]));
    correlator.handle_event(free(2, 0x200));

    let all = store.all_stacks_by_process();
    let views = all.get(&1000).expect("process aggregated");

    let one = views
        .iter()
        .find(|v| v.signature.addresses() == [0x11])
        .expect("thread 1 stack");
    assert_eq!(one.counters.outstanding_count(), 1);
    assert_eq!(one.counters.allocate_size, 16);

    let two = views
        .iter()
        .find(|v| v.signature.addresses() == [0x22])
        .expect("thread 2 stack");
    assert_eq!(two.counters.outstanding_count(), 0);
    assert_eq!(two.counters.free_size, 32);
}

#[test]
fn test_lost_correlation_is_counted_not_fatal() {
    let (mut correlator, store, stats) = pipeline();

    // Free with no prior allocation.
    correlator.handle_event(free(1, 0xDEAD));

    // Allocation freed before its capture arrives.
    correlator.handle_event(alloc(1, 0x100, 8));
    correlator.handle_event(free(1, 0x100));
    correlator.handle_event(capture(1, &[0x11]));

    // Capture with no allocation at all on that thread.
    correlator.handle_event(capture(9, &[0x99]));

    assert_eq!(stats.count(Anomaly::UntrackedFree), 1);
    assert_eq!(stats.count(Anomaly::UnstackedFree), 1);
    assert_eq!(stats.count(Anomaly::OrphanStackCapture), 2);

    // The stream keeps working afterwards.
    correlator.handle_event(alloc(1, 0x300, 8));
    correlator.handle_event(capture(1, &[0x33]));
    let top = store.top_stacks(10, 0);
    assert!(top
        .iter()
        .any(|v| v.signature.addresses() == [0x33] && v.counters.outstanding_count() == 1));
}

#[test]
fn test_clear_resets_queries_mid_session() {
    let (mut correlator, store, _stats) = pipeline();

    correlator.handle_event(alloc(1, 0x100, 8));
    correlator.handle_event(capture(1, &[0x11]));
    assert_eq!(store.top_stacks(10, 0).len(), 1);

    store.clear();
    assert!(store.top_stacks(10, 0).is_empty());
    assert!(store.all_stacks_by_process().is_empty());

    // New events repopulate the store.
    correlator.handle_event(alloc(1, 0x200, 8));
    correlator.handle_event(capture(1, &[0x22]));
    assert_eq!(store.top_stacks(10, 0).len(), 1);
}

#[test]
fn test_signature_identity_across_repeated_captures() {
    let (mut correlator, store, _stats) = pipeline();

    // The same call path reported twice must land on one entry; a
    // reordered path must not.
    correlator.handle_event(alloc(1, 0x100, 8));
    correlator.handle_event(capture(1, &[0xA, 0xB, 0xC]));
    correlator.handle_event(alloc(1, 0x200, 8));
    correlator.handle_event(capture(1, &[0xA, 0xB, 0xC]));
    correlator.handle_event(alloc(1, 0x300, 8));
    correlator.handle_event(capture(1, &[0xC, 0xB, 0xA]));

    let all = store.all_stacks_by_process();
    let views = all.get(&1000).expect("process aggregated");
    assert_eq!(views.len(), 2);

    let merged = views
        .iter()
        .find(|v| v.signature.addresses() == [0xA, 0xB, 0xC])
        .expect("merged entry");
    assert_eq!(merged.counters.allocate_count, 2);
}

#[test]
fn test_deterministic_ranking_across_processes() {
    let store = StackStore::new();

    // Equal outstanding counts; ordering falls back to pid then addresses.
    store.record_allocation(300, StackSignature::new(vec![0x3]), 8);
    store.record_allocation(100, StackSignature::new(vec![0x1]), 8);
    store.record_allocation(200, StackSignature::new(vec![0x2]), 8);

    let first = store.top_stacks(10, 0);
    let second = store.top_stacks(10, 0);

    let pids: Vec<u32> = first.iter().map(|v| v.pid).collect();
    assert_eq!(pids, vec![100, 200, 300]);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.pid, b.pid);
        assert_eq!(a.signature, b.signature);
    }
}

#[tokio::test]
async fn test_session_lifecycle_end_to_end() {
    let mut session = Session::new(&Config::default());
    session.start().await.expect("start");

    assert!(matches!(
        session.start().await,
        Err(SessionError::AlreadyActive),
    ));

    for i in 0..50u64 {
        session.handle_event(alloc(1, 0x5000 + i, 256));
        session.handle_event(capture(1, &[0xF00D, 0xFACE]));
    }
    for i in 0..20u64 {
        session.handle_event(free(1, 0x5000 + i));
    }

    // Stop drains queued events, so the queries below are deterministic.
    session.stop().await;

    let top = session.top_stacks(5, 0);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].pid, 1000);
    assert_eq!(top[0].counters.allocate_count, 50);
    assert_eq!(top[0].counters.free_count, 20);
    assert_eq!(top[0].counters.outstanding_count(), 30);
    assert_eq!(top[0].counters.outstanding_size(), 30 * 256);

    session.clear();
    assert!(session.top_stacks(5, 0).is_empty());
}
