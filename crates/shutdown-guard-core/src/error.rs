//! Error types for guard registration and startup

use crate::notifier::Backend;
use crate::registry::Handle;

/// Error returned by [`Guard`](crate::Guard) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Registration attempted after the shutdown snapshot was taken
    AlreadyShuttingDown,
    /// `start()` called on a guard that is already armed or has finished
    AlreadyStarted,
    /// The OS subscription could not be established, or was lost while waiting
    NotifierUnavailable { backend: Backend, reason: String },
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyShuttingDown => write!(f, "shutdown already in progress"),
            Self::AlreadyStarted => write!(f, "guard already started"),
            Self::NotifierUnavailable { backend, reason } => {
                write!(f, "{backend} notifier unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for GuardError {}

impl GuardError {
    pub fn unavailable(backend: Backend, reason: impl std::fmt::Display) -> Self {
        Self::NotifierUnavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Whether calling the same operation again may succeed.
    ///
    /// An unavailable notifier leaves the guard idle, so a later `start()` can
    /// retry (e.g. once the system bus is up). The other two never recover.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotifierUnavailable { .. })
    }
}

/// A callback that panicked during a shutdown episode.
///
/// Contained by the executor; the remaining callbacks still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub handle: Handle,
    pub message: String,
}

impl std::fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "callback {} panicked: {}", self.handle, self.message)
    }
}
