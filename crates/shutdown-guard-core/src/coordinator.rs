//! Shutdown coordinator: the state machine between the notifier and the
//! callback registry.
//!
//! Arbitration is "first transition wins": `stop()` and the shutdown path both
//! compare-and-swap out of `Armed`, and whoever loses backs off.

use parking_lot::Mutex;

use crate::config::TimeBudget;
use crate::error::GuardError;
use crate::executor::{self, Outcome, ShutdownReport};
use crate::notifier::{Backend, Interrupt, Notification, Notifier, ShutdownReason};
use crate::registry::{Callback, CallbackRegistry, Handle};
use crate::state::{AtomicState, ShutdownState};

use ShutdownState::{Armed, Completed, Idle, ShuttingDown, Stopped};

pub(crate) struct Coordinator {
    state: AtomicState,
    registry: CallbackRegistry,
    budget: TimeBudget,
    backend: Backend,
    /// Locked for the whole of `start()`; nothing else touches the notifier.
    notifier: Mutex<Box<dyn Notifier>>,
    /// Filled while armed so `stop()` can break the wait from another thread.
    interrupt: Mutex<Option<Box<dyn Interrupt>>>,
    report: Mutex<Option<ShutdownReport>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state.load())
            .field("backend", &self.backend)
            .field("budget", &self.budget)
            .field("callbacks", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub(crate) fn new(notifier: Box<dyn Notifier>, budget: TimeBudget) -> Self {
        Self {
            state: AtomicState::new(),
            registry: CallbackRegistry::new(),
            budget,
            backend: notifier.backend(),
            notifier: Mutex::new(notifier),
            interrupt: Mutex::new(None),
            report: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ShutdownState {
        self.state.load()
    }

    pub(crate) fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn budget(&self) -> TimeBudget {
        self.budget
    }

    pub(crate) fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub(crate) fn last_report(&self) -> Option<ShutdownReport> {
        self.report.lock().clone()
    }

    pub(crate) fn register(&self, callback: Callback) -> Result<Handle, GuardError> {
        // Fast path; the registry seal is what makes this airtight.
        if self.state.load().is_shutting_down_or_done() {
            return Err(GuardError::AlreadyShuttingDown);
        }
        self.registry.register(callback)
    }

    /// Arm, wait, and (at most once) run the shutdown episode.
    pub(crate) fn start(&self) -> Result<Outcome, GuardError> {
        match self.state.transition(Idle, Armed) {
            Ok(()) => {}
            Err(Stopped) => return Ok(Outcome::Stopped),
            Err(_) => return Err(GuardError::AlreadyStarted),
        }

        let mut notifier = self.notifier.lock();
        let interrupt = match notifier.arm(self.budget) {
            Ok(interrupt) => interrupt,
            Err(e) => {
                notifier.disarm();
                let _ = self.state.transition(Armed, Idle);
                log::warn!("cannot arm shutdown guard: {e}");
                return Err(e);
            }
        };
        *self.interrupt.lock() = Some(interrupt);
        log::info!(
            "shutdown guard armed ({} backend, {} callbacks, {} budget)",
            self.backend,
            self.registry.len(),
            self.budget
        );

        // `stop()` publishes its transition before reading the interrupt slot;
        // we filled the slot before this read, so one of us sees the other.
        let result = if self.state.load() == Stopped {
            Ok(Outcome::Stopped)
        } else {
            match notifier.wait_for_shutdown() {
                Notification::Shutdown(reason) => self.shutdown(reason, &mut **notifier),
                Notification::Cancelled => {
                    let _ = self.state.transition(Armed, Stopped);
                    Ok(Outcome::Stopped)
                }
                Notification::Lost(message) => match self.state.transition(Armed, Idle) {
                    Ok(()) => {
                        log::warn!("{} notifier lost: {message}", self.backend);
                        Err(GuardError::unavailable(self.backend, message))
                    }
                    Err(_) => Ok(Outcome::Stopped),
                },
            }
        };

        self.interrupt.lock().take();
        notifier.disarm();
        if let Ok(Outcome::Stopped) = result {
            log::info!("shutdown guard stopped");
        }
        result
    }

    fn shutdown(
        &self,
        reason: ShutdownReason,
        notifier: &mut dyn Notifier,
    ) -> Result<Outcome, GuardError> {
        if self.state.transition(Armed, ShuttingDown).is_err() {
            log::debug!("{reason} arrived after stop(), ignoring");
            return Ok(Outcome::Stopped);
        }

        let batch = self.registry.snapshot();
        log::info!(
            "shutdown detected ({reason}), running {} callbacks",
            batch.len()
        );
        let report = executor::execute(batch, self.budget, reason);
        let outcome = report.outcome();

        let _ = self.state.transition(ShuttingDown, Completed);
        notifier.acknowledge(outcome);

        match outcome {
            Outcome::ShutdownTimedOut => log::warn!(
                "shutdown callbacks timed out after {:?}: {} done, {} failed, {} skipped",
                report.elapsed,
                report.completed.len(),
                report.failed.len(),
                report.skipped.len()
            ),
            _ => log::info!(
                "shutdown callbacks finished in {:?}: {} done, {} failed",
                report.elapsed,
                report.completed.len(),
                report.failed.len()
            ),
        }
        *self.report.lock() = Some(report);
        Ok(outcome)
    }

    /// Cancel a pending or future `start()`. No effect once shutdown began.
    pub(crate) fn stop(&self) {
        let won = self.state.transition(Idle, Stopped).is_ok()
            || self.state.transition(Armed, Stopped).is_ok();
        if !won {
            log::debug!("stop() ignored in state {}", self.state.load());
            return;
        }
        if let Some(interrupt) = self.interrupt.lock().as_ref() {
            interrupt.interrupt();
        }
    }
}
