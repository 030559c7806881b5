use std::io::{self, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ReportConfig;
use crate::store::{AggregatedStackView, StackStore};

/// Periodic renderer of ranked leak reports from the aggregation store.
///
/// Frame addresses are printed in hex; resolving them to symbols is the
/// consumer's job.
pub struct Reporter {
    cfg: ReportConfig,
    store: Arc<StackStore>,
}

impl Reporter {
    /// Creates a reporter over the given store.
    pub fn new(cfg: ReportConfig, store: Arc<StackStore>) -> Self {
        Self { cfg, store }
    }

    /// Renders one report to `out`: the ranked top list, or the full
    /// per-process dump when `top` is zero.
    pub fn write_report(&self, out: &mut impl Write) -> io::Result<()> {
        if self.cfg.top == 0 {
            self.write_full_dump(out)
        } else {
            self.write_top(out)
        }
    }

    fn write_top(&self, out: &mut impl Write) -> io::Result<()> {
        let views = self.store.top_stacks(self.cfg.top, self.cfg.min_outstanding);

        writeln!(
            out,
            "=== top {} stacks by outstanding allocations (min {}) ===",
            self.cfg.top, self.cfg.min_outstanding,
        )?;

        if views.is_empty() {
            writeln!(out, "(no stacks above threshold)")?;
            return Ok(());
        }

        for view in &views {
            Self::write_view(out, view)?;
        }

        Ok(())
    }

    fn write_full_dump(&self, out: &mut impl Write) -> io::Result<()> {
        let by_process = self.store.all_stacks_by_process();

        let mut pids: Vec<u32> = by_process.keys().copied().collect();
        pids.sort_unstable();

        writeln!(out, "=== all stacks ({} processes) ===", pids.len())?;

        for pid in pids {
            let Some(views) = by_process.get(&pid) else {
                continue;
            };
            writeln!(out, "process {pid} ({} stacks)", views.len())?;
            for view in views {
                Self::write_view(out, view)?;
            }
        }

        Ok(())
    }

    fn write_view(out: &mut impl Write, view: &AggregatedStackView) -> io::Result<()> {
        let c = &view.counters;
        writeln!(
            out,
            "pid {}  outstanding {} allocs / {} bytes  (alloc {}/{}, free {}/{})",
            view.pid,
            c.outstanding_count(),
            c.outstanding_size(),
            c.allocate_count,
            c.allocate_size,
            c.free_count,
            c.free_size,
        )?;
        for address in view.signature.addresses() {
            writeln!(out, "    {address:#018x}")?;
        }
        Ok(())
    }

    /// Spawns the periodic report task. Stops on cancellation, or after
    /// `count` reports when `count` is nonzero.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick so the first report waits a
            // full interval of data.
            ticker.tick().await;

            let mut reported = 0u64;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let stdout = io::stdout();
                        let mut out = stdout.lock();
                        if let Err(e) = self.write_report(&mut out) {
                            warn!(error = %e, "writing leak report failed");
                        }

                        reported += 1;
                        if self.cfg.count > 0 && reported >= self.cfg.count {
                            info!(reported, "report count reached, reporter stopping");
                            return;
                        }
                    }
                }
            }
        })
    }
}
