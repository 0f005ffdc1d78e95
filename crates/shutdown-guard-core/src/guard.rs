//! Public handle: register callbacks, then dedicate a thread to `start()`.

use std::sync::Arc;

use crate::config::{GuardConfig, TimeBudget};
use crate::coordinator::Coordinator;
use crate::error::GuardError;
use crate::executor::{Outcome, ShutdownReport};
use crate::notifier::{self, Backend, Notifier};
use crate::registry::Handle;
use crate::state::ShutdownState;

/// Runs registered cleanup callbacks once when the OS announces shutdown.
///
/// Cloning is cheap and every clone drives the same guard, so one thread can
/// block in [`start`](Self::start) while others register callbacks or call
/// [`stop`](Self::stop).
///
/// ```no_run
/// use shutdown_guard_core::{Guard, Outcome};
///
/// let guard = Guard::new();
/// guard.register(|| println!("flushing state")).unwrap();
///
/// match guard.start() {
///     Ok(Outcome::ShutdownTimedOut) => eprintln!("cleanup did not finish in time"),
///     Ok(_) => {}
///     Err(e) => eprintln!("shutdown monitoring unavailable: {e}"),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Guard {
    inner: Arc<Coordinator>,
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

impl Guard {
    /// Default budget and the platform's default backend. No OS interaction
    /// happens until [`start`](Self::start).
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        Self::with_notifier(notifier::for_config(&config), config.budget)
    }

    /// Use a caller-supplied notifier (e.g. [`ManualNotifier`](crate::ManualNotifier))
    pub fn with_notifier(notifier: Box<dyn Notifier>, budget: TimeBudget) -> Self {
        Self {
            inner: Arc::new(Coordinator::new(notifier, budget)),
        }
    }

    /// Add a cleanup callback; callbacks run in registration order.
    ///
    /// Fails with [`GuardError::AlreadyShuttingDown`] once the shutdown
    /// episode has started.
    pub fn register<F>(&self, callback: F) -> Result<Handle, GuardError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.register(Box::new(callback))
    }

    /// Remove a callback. Unknown handles are ignored.
    pub fn unregister(&self, handle: Handle) {
        self.inner.registry().unregister(handle);
    }

    /// Remove every registered callback. Ignored once the shutdown episode has
    /// taken its snapshot.
    pub fn clear(&self) {
        self.inner.registry().clear();
    }

    /// Block until shutdown is handled, [`stop`](Self::stop) is called, or the
    /// notifier fails.
    pub fn start(&self) -> Result<Outcome, GuardError> {
        self.inner.start()
    }

    /// Cancel monitoring. Safe from any thread at any time; once the shutdown
    /// episode has begun it runs to completion regardless.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn state(&self) -> ShutdownState {
        self.inner.state()
    }

    pub fn callback_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Report of the shutdown episode, once one has run
    pub fn last_report(&self) -> Option<ShutdownReport> {
        self.inner.last_report()
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    pub fn budget(&self) -> TimeBudget {
        self.inner.budget()
    }
}
