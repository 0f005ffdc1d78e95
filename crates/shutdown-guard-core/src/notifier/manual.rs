//! In-process notifier driven by a [`ManualTrigger`].
//!
//! Useful for tests and for applications that decide on their own when the
//! cleanup episode should run (e.g. an admin endpoint).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Backend, Interrupt, Notification, Notifier, ShutdownReason};
use crate::config::TimeBudget;
use crate::error::GuardError;
use crate::executor::Outcome;
use crate::wake::Doorbell;

#[derive(Debug, Default)]
struct Shared {
    bell: Mutex<Option<Arc<Doorbell>>>,
    fired: AtomicUsize,
    acknowledged: Mutex<Option<Outcome>>,
}

/// Notifier whose shutdown notification is injected through a [`ManualTrigger`].
#[derive(Debug)]
pub struct ManualNotifier {
    shared: Arc<Shared>,
    fail_with: Option<String>,
}

impl Default for ManualNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualNotifier {
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
            fail_with: None,
        }
    }

    /// A notifier whose subscription always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            shared: Arc::default(),
            fail_with: Some(reason.into()),
        }
    }

    pub fn trigger(&self) -> ManualTrigger {
        ManualTrigger {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Cloneable handle that injects shutdown notifications.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    shared: Arc<Shared>,
}

impl ManualTrigger {
    /// Inject a notification. Safe to call any number of times from any thread;
    /// before the notifier is armed (or after it is disarmed) it is dropped.
    ///
    /// Returns whether this call was the one that delivered the notification.
    pub fn fire(&self, reason: ShutdownReason) -> bool {
        self.shared.fired.fetch_add(1, Ordering::SeqCst);
        match self.shared.bell.lock().as_ref() {
            Some(bell) => bell.ring(reason),
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.bell.lock().is_some()
    }

    /// Total `fire` calls, delivered or not
    pub fn fired(&self) -> usize {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Outcome passed to [`Notifier::acknowledge`], if any
    pub fn acknowledged(&self) -> Option<Outcome> {
        *self.shared.acknowledged.lock()
    }
}

struct BellInterrupt(Arc<Doorbell>);

impl Interrupt for BellInterrupt {
    fn interrupt(&self) {
        self.0.cancel();
    }
}

impl Notifier for ManualNotifier {
    fn backend(&self) -> Backend {
        Backend::Manual
    }

    fn arm(&mut self, _budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError> {
        if let Some(reason) = &self.fail_with {
            return Err(GuardError::unavailable(Backend::Manual, reason));
        }
        let bell = Arc::new(Doorbell::new());
        *self.shared.bell.lock() = Some(Arc::clone(&bell));
        Ok(Box::new(BellInterrupt(bell)))
    }

    fn wait_for_shutdown(&mut self) -> Notification {
        let bell = self.shared.bell.lock().clone();
        match bell {
            Some(bell) => bell.wait(),
            None => Notification::Lost("not armed".to_string()),
        }
    }

    fn acknowledge(&mut self, outcome: Outcome) {
        *self.shared.acknowledged.lock() = Some(outcome);
    }

    fn disarm(&mut self) {
        self.shared.bell.lock().take();
    }
}
