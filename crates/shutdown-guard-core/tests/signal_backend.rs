//! Real signal delivery through the signal backend.
//!
//! Lives in its own test binary because signal dispositions are process-wide.
#![cfg(unix)]

use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use shutdown_guard_core::notifier::signal::SignalNotifier;
use shutdown_guard_core::{
    Backend, Guard, GuardConfig, Notification, Notifier, Outcome, ShutdownReason, TimeBudget,
};
use signal_hook::consts::{SIGTERM, SIGUSR1};
use signal_hook::low_level::raise;

/// Set in re-executed copies of this binary; names the scenario to run.
const CHILD_ENV: &str = "SHUTDOWN_GUARD_SIGNAL_CHILD";

#[test]
fn repeated_sigterm_runs_callbacks_once() {
    // Keep SIGTERM from killing the test binary before the guard subscribes.
    let absorbed = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&absorbed)).unwrap();

    let guard = Guard::with_config(GuardConfig {
        budget: TimeBudget::from_millis(2_000),
        backend: Backend::Signal,
        signals: vec![SIGTERM],
    });
    let runs = Arc::new(AtomicUsize::new(0));
    let raising_done = Arc::new(AtomicBool::new(false));
    {
        let runs = Arc::clone(&runs);
        let raising_done = Arc::clone(&raising_done);
        guard
            .register(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                // Hold the episode open until the last raise has returned:
                // once disarmed, SIGTERM terminates the process again.
                let deadline = Instant::now() + Duration::from_secs(1);
                while !raising_done.load(Ordering::SeqCst) && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();
    }

    let supervisor = {
        let guard = guard.clone();
        thread::spawn(move || guard.start())
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while runs.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "guard never observed SIGTERM");
        raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    raising_done.store(true, Ordering::SeqCst);

    assert_eq!(supervisor.join().unwrap(), Ok(Outcome::ShutdownCompleted));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let report = guard.last_report().unwrap();
    assert_eq!(report.reason, ShutdownReason::Signal(SIGTERM));
}

/// Re-run this binary with only `test` selected and return how it exited.
fn run_child(test: &str) -> std::process::ExitStatus {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test, "--test-threads=1"])
        .env(CHILD_ENV, test)
        .status()
        .unwrap()
}

fn is_child(test: &str) -> bool {
    std::env::var(CHILD_ENV).is_ok_and(|v| v == test)
}

#[test]
fn disarmed_notifier_restores_default_action() {
    const NAME: &str = "disarmed_notifier_restores_default_action";
    if !is_child(NAME) {
        let status = run_child(NAME);
        assert_eq!(status.signal(), Some(SIGUSR1), "child survived: {status}");
        return;
    }

    let mut notifier = SignalNotifier::with_signals(&[SIGUSR1]);
    let interrupt = notifier.arm(TimeBudget::default()).unwrap();
    raise(SIGUSR1).unwrap();
    assert_eq!(
        notifier.wait_for_shutdown(),
        Notification::Shutdown(ShutdownReason::Signal(SIGUSR1))
    );
    interrupt.interrupt();
    notifier.disarm();

    raise(SIGUSR1).unwrap();
    thread::sleep(Duration::from_millis(500));
}

#[test]
fn stopped_guard_restores_default_action() {
    const NAME: &str = "stopped_guard_restores_default_action";
    if !is_child(NAME) {
        let status = run_child(NAME);
        assert_eq!(status.signal(), Some(SIGUSR1), "child survived: {status}");
        return;
    }

    let guard = Guard::with_config(GuardConfig {
        backend: Backend::Signal,
        signals: vec![SIGUSR1],
        ..Default::default()
    });
    let supervisor = {
        let guard = guard.clone();
        thread::spawn(move || guard.start())
    };
    thread::sleep(Duration::from_millis(200));
    guard.stop();
    assert_eq!(supervisor.join().unwrap(), Ok(Outcome::Stopped));

    raise(SIGUSR1).unwrap();
    thread::sleep(Duration::from_millis(500));
}
