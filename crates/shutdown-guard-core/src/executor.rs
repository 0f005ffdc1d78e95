//! Time-boxed, panic-isolated execution of a callback snapshot.
//!
//! Callbacks run sequentially on a dedicated executor thread. The budget is
//! checked before each callback; a running callback is never interrupted. The
//! supervising thread waits for progress no longer than the budget, so a hung
//! callback delays `start()` by at most the budget, not forever.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::config::TimeBudget;
use crate::error::CallbackFailure;
use crate::notifier::ShutdownReason;
use crate::registry::{Callback, Handle};

/// How `start()` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every callback ran within the budget
    ShutdownCompleted,
    /// The budget ran out; some callbacks may not have run
    ShutdownTimedOut,
    /// `stop()` won before any shutdown notification
    Stopped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShutdownCompleted => write!(f, "completed"),
            Self::ShutdownTimedOut => write!(f, "timed out"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What happened during one shutdown episode
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// Callbacks that returned normally, in execution order
    pub completed: Vec<Handle>,
    /// Callbacks that panicked
    pub failed: Vec<CallbackFailure>,
    /// Callbacks never started (budget exhausted), plus one abandoned mid-run
    pub skipped: Vec<Handle>,
    pub elapsed: Duration,
    pub budget: TimeBudget,
}

impl ShutdownReport {
    /// Timed out if anything was skipped or the episode overran its budget.
    pub fn outcome(&self) -> Outcome {
        if !self.skipped.is_empty() || self.elapsed > self.budget.limit() {
            Outcome::ShutdownTimedOut
        } else {
            Outcome::ShutdownCompleted
        }
    }
}

enum Progress {
    Done(Handle),
    Panicked(Handle, String),
    Skipped(Handle),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_batch(
    batch: Vec<(Handle, Callback)>,
    deadline: Instant,
    abandoned: &AtomicBool,
    tx: &mpsc::Sender<Progress>,
) {
    for (handle, callback) in batch {
        let progress = if abandoned.load(Ordering::SeqCst) || Instant::now() >= deadline {
            Progress::Skipped(handle)
        } else {
            match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(()) => Progress::Done(handle),
                Err(payload) => Progress::Panicked(handle, panic_message(payload.as_ref())),
            }
        };
        // Receiver gone means the supervisor already gave up on us.
        if tx.send(progress).is_err() {
            return;
        }
    }
}

/// Run `batch` in order under `budget` and report what happened.
pub fn execute(
    batch: Vec<(Handle, Callback)>,
    budget: TimeBudget,
    reason: ShutdownReason,
) -> ShutdownReport {
    let started = Instant::now();
    let deadline = started + budget.limit();
    let order: Vec<Handle> = batch.iter().map(|(h, _)| *h).collect();
    let mut report = ShutdownReport {
        reason,
        completed: Vec::with_capacity(order.len()),
        failed: Vec::new(),
        skipped: Vec::new(),
        elapsed: Duration::ZERO,
        budget,
    };
    if order.is_empty() {
        return report;
    }

    let (tx, rx) = mpsc::channel();
    let abandoned = Arc::new(AtomicBool::new(false));

    // Parked in a shared slot so a failed spawn hands the batch back.
    let slot = Arc::new(parking_lot::Mutex::new(Some(batch)));
    let spawned = {
        let slot = Arc::clone(&slot);
        let abandoned = Arc::clone(&abandoned);
        std::thread::Builder::new()
            .name("shutdown-guard-callbacks".to_string())
            .spawn(move || {
                let batch = slot.lock().take();
                if let Some(batch) = batch {
                    run_batch(batch, deadline, &abandoned, &tx);
                }
            })
    };

    match spawned {
        // Dropping the JoinHandle detaches: a callback stuck past the deadline keeps its thread.
        Ok(_detached) => {
            collect(&mut report, &order, rx, Some(deadline), started);
            abandoned.store(true, Ordering::SeqCst);
        }
        Err(e) => {
            log::warn!("cannot spawn callback executor ({e}), running callbacks inline");
            let (tx, rx) = mpsc::channel();
            let batch = slot.lock().take();
            if let Some(batch) = batch {
                run_batch(batch, deadline, &abandoned, &tx);
            }
            drop(tx);
            collect(&mut report, &order, rx, None, started);
        }
    }
    report
}

fn record(report: &mut ShutdownReport, progress: Progress) {
    match progress {
        Progress::Done(handle) => report.completed.push(handle),
        Progress::Panicked(handle, message) => {
            let failure = CallbackFailure { handle, message };
            log::error!("{failure}");
            report.failed.push(failure);
        }
        Progress::Skipped(handle) => report.skipped.push(handle),
    }
}

fn collect(
    report: &mut ShutdownReport,
    order: &[Handle],
    rx: mpsc::Receiver<Progress>,
    deadline: Option<Instant>,
    started: Instant,
) {
    let mut seen = 0;
    while seen < order.len() {
        let next = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(progress) => {
                seen += 1;
                record(report, progress);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Progress sent right at the deadline still counts.
                while let Ok(progress) = rx.try_recv() {
                    seen += 1;
                    record(report, progress);
                }
                if seen < order.len() {
                    log::warn!(
                        "callback {} still running at the {} budget, abandoning it",
                        order[seen],
                        report.budget
                    );
                }
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    report.skipped.extend_from_slice(&order[seen..]);
    report.elapsed = started.elapsed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn h(id: u64) -> Handle {
        Handle::from_raw(id)
    }

    fn cb(f: impl FnOnce() + Send + 'static) -> Callback {
        Box::new(f)
    }

    #[test]
    fn empty_batch_completes() {
        let report = execute(Vec::new(), TimeBudget::default(), ShutdownReason::Manual);
        assert_eq!(report.outcome(), Outcome::ShutdownCompleted);
        assert!(report.completed.is_empty());
    }

    #[test]
    fn runs_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let batch: Vec<(Handle, Callback)> = (1..=3)
            .map(|i| {
                let seen = Arc::clone(&seen);
                (h(i), cb(move || seen.lock().push(i)))
            })
            .collect();

        let report = execute(batch, TimeBudget::default(), ShutdownReason::Manual);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(report.completed, vec![h(1), h(2), h(3)]);
        assert_eq!(report.outcome(), Outcome::ShutdownCompleted);
    }

    #[test]
    fn panic_is_contained() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let batch = vec![
            (h(1), cb(|| panic!("disk on fire"))),
            (
                h(2),
                cb(move || {
                    ran2.fetch_add(1, Ordering::SeqCst);
                }),
            ),
        ];

        let report = execute(batch, TimeBudget::default(), ShutdownReason::Manual);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].handle, h(1));
        assert_eq!(report.failed[0].message, "disk on fire");
        assert_eq!(report.completed, vec![h(2)]);
        assert_eq!(report.outcome(), Outcome::ShutdownCompleted);
    }

    #[test]
    fn overrun_skips_remaining() {
        let third = Arc::new(AtomicBool::new(false));
        let third2 = Arc::clone(&third);
        let batch = vec![
            (h(1), cb(|| {})),
            (h(2), cb(|| std::thread::sleep(Duration::from_millis(150)))),
            (h(3), cb(move || third2.store(true, Ordering::SeqCst))),
        ];

        let report = execute(batch, TimeBudget::from_millis(50), ShutdownReason::Manual);
        assert_eq!(report.outcome(), Outcome::ShutdownTimedOut);
        assert_eq!(report.completed, vec![h(1)]);
        assert!(report.skipped.contains(&h(3)));
        // The executor may still reach #3 after we stop waiting; it must skip it.
        std::thread::sleep(Duration::from_millis(200));
        assert!(!third.load(Ordering::SeqCst));
    }

    #[test]
    fn zero_budget_skips_everything() {
        let batch = vec![(h(1), cb(|| {})), (h(2), cb(|| {}))];
        let report = execute(batch, TimeBudget::from_millis(0), ShutdownReason::Manual);
        assert_eq!(report.skipped, vec![h(1), h(2)]);
        assert_eq!(report.outcome(), Outcome::ShutdownTimedOut);
    }

    #[test]
    fn progress_at_deadline_is_not_abandoned() {
        let order = [h(1), h(2), h(3)];
        let mut report = ShutdownReport {
            reason: ShutdownReason::Manual,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
            budget: TimeBudget::from_millis(10),
        };
        let (tx, rx) = mpsc::channel();
        tx.send(Progress::Done(h(1))).unwrap();
        tx.send(Progress::Done(h(2))).unwrap();

        // Deadline already passed, sender still alive: #3 is the only one abandoned.
        let started = Instant::now();
        collect(&mut report, &order, rx, Some(started), started);
        assert_eq!(report.completed, vec![h(1), h(2)]);
        assert_eq!(report.skipped, vec![h(3)]);
        drop(tx);
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }
}
