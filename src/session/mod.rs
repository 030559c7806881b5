use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlate::stats::CorrelationStats;
use crate::correlate::Correlator;
use crate::store::{AggregatedStackView, StackStore};
use crate::trace::event::HeapEvent;
use crate::trace::stats::EventStats;
use crate::trace::EventHandler;

/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a correlation session is already active")]
    AlreadyActive,
}

/// One heap observation session: owns the aggregation store, the
/// correlation state machine, and the event-consumption task.
///
/// Events enter through a bounded channel and are applied by a single
/// spawned task, so the correlator never needs a lock. Queries read the
/// shared store directly and stay valid after `stop`.
pub struct Session {
    store: Arc<StackStore>,
    event_stats: Arc<EventStats>,
    correlation_stats: Arc<CorrelationStats>,

    /// Event channel sender for the processing loop.
    event_tx: mpsc::Sender<HeapEvent>,
    /// Event channel receiver, taken by `start`.
    event_rx: Option<mpsc::Receiver<HeapEvent>>,

    cancel: CancellationToken,

    /// Handle for the session run task.
    run_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Session {
    /// Creates a new session with the configured channel capacity.
    pub fn new(cfg: &Config) -> Self {
        let (event_tx, event_rx) = mpsc::channel(cfg.channel_capacity);

        Self {
            store: Arc::new(StackStore::new()),
            event_stats: Arc::new(EventStats::new()),
            correlation_stats: Arc::new(CorrelationStats::new()),
            event_tx,
            event_rx: Some(event_rx),
            cancel: CancellationToken::new(),
            run_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Starts the event-consumption task and the periodic stats reporter.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let Some(mut event_rx) = self.event_rx.take() else {
            return Err(SessionError::AlreadyActive);
        };

        let mut correlator = Correlator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.correlation_stats),
        );
        let ctx = self.cancel.child_token();

        let run_task = tokio::spawn(async move {
            const BATCH_SIZE: usize = 256;

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        // Apply whatever is already queued so shutdown lands
                        // on an event boundary.
                        while let Ok(event) = event_rx.try_recv() {
                            correlator.handle_event(event);
                        }
                        debug!(
                            live = correlator.live_allocations(),
                            "session run loop stopped",
                        );
                        return;
                    }

                    Some(event) = event_rx.recv() => {
                        correlator.handle_event(event);

                        // Drain up to BATCH_SIZE-1 more events without blocking.
                        for _ in 0..BATCH_SIZE - 1 {
                            match event_rx.try_recv() {
                                Ok(event) => correlator.handle_event(event),
                                Err(_) => break,
                            }
                        }
                    }
                }
            }
        });
        *self.run_task.lock().await = Some(run_task);

        self.spawn_stats_reporter();

        info!("session started");

        Ok(())
    }

    /// Cancels the run loop at an event boundary and joins it. Queries
    /// against the store remain valid afterwards.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "session task join failed");
            }
        }

        info!("session stopped");
    }

    /// Enqueues one event for correlation. Never blocks: when the channel
    /// is full the event is dropped with a warning.
    pub fn handle_event(&self, event: HeapEvent) {
        Self::dispatch(&self.event_stats, &self.event_tx, event);
    }

    /// Returns an event handler suitable for registering on a trace
    /// source.
    pub fn event_handler(&self) -> EventHandler {
        let event_stats = Arc::clone(&self.event_stats);
        let event_tx = self.event_tx.clone();

        Box::new(move |event| {
            Self::dispatch(&event_stats, &event_tx, event);
        })
    }

    /// Only events that actually enter the channel count as captured;
    /// drops are logged instead.
    fn dispatch(event_stats: &EventStats, event_tx: &mpsc::Sender<HeapEvent>, event: HeapEvent) {
        let kind = event.kind();
        match event_tx.try_send(event) {
            Ok(()) => event_stats.record(kind),
            Err(_) => warn!(kind = %kind, "session event channel full, dropping event"),
        }
    }

    /// The shared aggregation store.
    pub fn store(&self) -> &Arc<StackStore> {
        &self.store
    }

    /// Ranked leak query, delegated to the store.
    pub fn top_stacks(&self, limit: usize, min_outstanding: u64) -> Vec<AggregatedStackView> {
        self.store.top_stacks(limit, min_outstanding)
    }

    /// Full per-process dump, delegated to the store.
    pub fn all_stacks_by_process(&self) -> HashMap<u32, Vec<AggregatedStackView>> {
        self.store.all_stacks_by_process()
    }

    /// Discards all aggregated state.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Spawn background event stats reporter.
    fn spawn_stats_reporter(&self) {
        let cancel = self.cancel.child_token();
        let event_stats = Arc::clone(&self.event_stats);
        let correlation_stats = Arc::clone(&self.correlation_stats);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let events = event_stats.snapshot();
                        let total: u64 = events.iter().map(|(_, n)| n).sum();

                        if total == 0 {
                            continue;
                        }

                        info!(captured = total, "event stats (60s)");

                        for (kind, count) in &events {
                            debug!(kind = %kind, count, "  by kind (60s)");
                        }

                        for (anomaly, count) in &correlation_stats.snapshot() {
                            debug!(anomaly = %anomaly, count, "  anomalies (60s)");
                        }
                    }
                }
            }
        });
    }
}

impl Drop for Session {
    /// Cancels the run loop and stats reporter so dropping an un-stopped
    /// session does not leave tasks parked forever.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
