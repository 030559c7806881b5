use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use leakwatch::config::Config;
use leakwatch::report::Reporter;
use leakwatch::session::Session;

/// Heap leak detection agent: ranks call stacks by outstanding allocations.
#[derive(Parser)]
#[command(name = "leakwatch", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target process id for the trace source to attach to.
    #[arg(short, long)]
    pid: Option<u32>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("leakwatch {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // CLI log level wins over config.
    let log_level = cli.log_level.as_ref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting leakwatch",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg, cli.pid).await })
}

async fn run(cfg: Config, pid: Option<u32>) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    // Start the correlation session.
    let mut session = Session::new(&cfg);
    session.start().await.context("starting session")?;

    if let Some(pid) = pid {
        tracing::info!(pid, "tracing target process");
    } else {
        tracing::warn!("no --pid given, waiting for an attached trace source");
    }

    // Start the periodic leak reporter.
    let report_cancel = tokio_util::sync::CancellationToken::new();
    let reporter = Reporter::new(cfg.report.clone(), std::sync::Arc::clone(session.store()));
    let report_task = reporter.spawn(report_cancel.child_token());

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown: stop ingest first so the final report sees every
    // applied event, then stop the reporter.
    session.stop().await;

    report_cancel.cancel();
    if let Err(e) = report_task.await {
        tracing::warn!(error = %e, "reporter task join failed");
    }

    // One final report on the way out.
    {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let reporter = Reporter::new(cfg.report, std::sync::Arc::clone(session.store()));
        if let Err(e) = reporter.write_report(&mut out) {
            tracing::warn!(error = %e, "final leak report failed");
        }
    }

    tracing::info!("leakwatch stopped");

    Ok(())
}
