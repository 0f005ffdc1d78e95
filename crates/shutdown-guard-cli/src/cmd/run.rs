//! Run subcommand: wait for OS shutdown and record when it happened

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use shutdown_guard_core::{Backend, Guard, Outcome, ShutdownState};

use crate::config::Config;
use crate::stamp;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// File the shutdown record is appended to (default from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Notification backend: signal, session-message, session-bus
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Callback time budget in milliseconds
    #[arg(long)]
    pub budget_ms: Option<u64>,

    /// Seconds between "still running" log lines (0 disables)
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,
}

pub fn run(args: RunArgs, config: &Config) -> Result<Outcome> {
    let guard_config = config.guard_config(args.backend, args.budget_ms)?;
    let output = args.output.unwrap_or_else(|| config.output.path.clone());
    let heartbeat = args.heartbeat_secs.unwrap_or(config.output.heartbeat_secs);

    let guard = Guard::with_config(guard_config);

    let path = output.clone();
    guard.register(move || {
        let record = stamp::format_record(chrono::Local::now());
        match stamp::append_durably(&path, &record) {
            Ok(()) => log::info!("Shutdown time written to {}", path.display()),
            Err(e) => log::error!("{e:#}"),
        }
    })?;

    log::info!(
        "Waiting for shutdown ({} backend, {} budget), recording to {}",
        guard.backend(),
        guard.budget(),
        output.display()
    );
    if heartbeat > 0 {
        spawn_heartbeat(guard.clone(), Duration::from_secs(heartbeat));
    }

    let outcome = guard
        .start()
        .context("Shutdown monitoring unavailable")?;

    if let Some(report) = guard.last_report() {
        log::info!(
            "Shutdown reason: {}, {} callbacks done in {:?}",
            report.reason,
            report.completed.len(),
            report.elapsed
        );
        for failure in &report.failed {
            log::error!("{failure}");
        }
    }
    if outcome == Outcome::ShutdownTimedOut {
        log::warn!("Shutdown record may be incomplete: budget exceeded");
    }
    Ok(outcome)
}

/// Log a liveness line until the guard leaves the armed state.
fn spawn_heartbeat(guard: Guard, every: Duration) {
    let spawned = std::thread::Builder::new()
        .name("heartbeat".into())
        .spawn(move || {
            let mut ticks = 0u64;
            loop {
                std::thread::sleep(every);
                if !matches!(guard.state(), ShutdownState::Idle | ShutdownState::Armed) {
                    break;
                }
                ticks += 1;
                log::info!("Still running ({}s)", ticks * every.as_secs());
            }
        });
    if let Err(e) = spawned {
        log::warn!("Heartbeat disabled: {e}");
    }
}
