//! Platform notifiers: the OS-facing half of the guard.
//!
//! Every backend reduces its native protocol to one blocking call,
//! [`Notifier::wait_for_shutdown`], with the same small set of outcomes.
//! Which backend is used is decided once, by [`for_config`], when the guard is
//! built; shared logic never branches on the platform.

pub mod manual;
#[cfg(unix)]
pub mod signal;
#[cfg(target_os = "linux")]
pub mod session_bus;
#[cfg(windows)]
pub mod session_message;

use std::str::FromStr;

use crate::config::{GuardConfig, TimeBudget};
use crate::error::GuardError;
use crate::executor::Outcome;

pub use manual::{ManualNotifier, ManualTrigger};

/// What the OS told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// POSIX termination signal (signal number)
    Signal(i32),
    /// Interactive session is ending (`WM_ENDSESSION` with `ENDSESSION_LOGOFF`, `CTRL_LOGOFF_EVENT`)
    Logoff,
    /// The machine is shutting down or rebooting
    SystemShutdown,
    /// The console window hosting the process is being closed
    ConsoleClose,
    /// logind `PrepareForShutdown(true)`
    PrepareForShutdown,
    /// Programmatic trigger through [`ManualTrigger`]
    Manual,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(sig) => match signal_name(*sig) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "signal {sig}"),
            },
            Self::Logoff => write!(f, "session logoff"),
            Self::SystemShutdown => write!(f, "system shutdown"),
            Self::ConsoleClose => write!(f, "console close"),
            Self::PrepareForShutdown => write!(f, "logind PrepareForShutdown"),
            Self::Manual => write!(f, "manual trigger"),
        }
    }
}

#[cfg(unix)]
fn signal_name(sig: i32) -> Option<&'static str> {
    signal_hook::low_level::signal_name(sig)
}

#[cfg(not(unix))]
fn signal_name(_sig: i32) -> Option<&'static str> {
    None
}

/// Result of one [`Notifier::wait_for_shutdown`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Shutdown(ShutdownReason),
    /// The wait was interrupted by `stop()`
    Cancelled,
    /// The OS subscription died while waiting
    Lost(String),
}

/// Cancels a pending [`Notifier::wait_for_shutdown`] from another thread.
///
/// Must be sticky: interrupting before the wait starts makes the wait return
/// [`Notification::Cancelled`] as soon as it is entered.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// OS shutdown source.
///
/// Driven by the coordinator in a fixed order on the supervising thread:
/// `arm` → `wait_for_shutdown` → (`acknowledge`) → `disarm`.
pub trait Notifier: Send {
    fn backend(&self) -> Backend;

    /// Subscribe with the OS. On error nothing may stay registered.
    fn arm(&mut self, budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError>;

    /// Block until a shutdown notification or an interrupt.
    fn wait_for_shutdown(&mut self) -> Notification;

    /// Release the OS once the episode finished (or timed out).
    fn acknowledge(&mut self, _outcome: Outcome) {}

    /// Drop every OS subscription. Idempotent.
    fn disarm(&mut self) {}
}

/// Notification mechanism selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// POSIX signals (`SIGINT`, `SIGTERM`, `SIGHUP`)
    Signal,
    /// Windows session messages and console control events
    SessionMessage,
    /// systemd-logind over the D-Bus system bus
    SessionBus,
    /// In-process trigger
    Manual,
}

impl Backend {
    /// Backends backed by an OS mechanism
    pub const OS_BACKENDS: [Backend; 3] =
        [Backend::Signal, Backend::SessionMessage, Backend::SessionBus];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::SessionMessage => "session-message",
            Self::SessionBus => "session-bus",
            Self::Manual => "manual",
        }
    }

    /// Whether this build contains an implementation for the backend
    pub fn is_compiled(self) -> bool {
        match self {
            Self::Signal => cfg!(unix),
            Self::SessionMessage => cfg!(windows),
            Self::SessionBus => cfg!(all(target_os = "linux", feature = "logind")),
            Self::Manual => true,
        }
    }

    /// Windows: session messages. Linux built with `logind`: session bus.
    /// Everything else: signals.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::SessionMessage
        } else if cfg!(all(target_os = "linux", feature = "logind")) {
            Self::SessionBus
        } else {
            Self::Signal
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signal" | "signals" | "posix" => Ok(Self::Signal),
            "session-message" | "session_message" | "windows" => Ok(Self::SessionMessage),
            "session-bus" | "session_bus" | "logind" | "dbus" => Ok(Self::SessionBus),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Build the notifier for `config.backend`.
///
/// A backend that is not compiled into this build still yields a notifier; it
/// reports [`GuardError::NotifierUnavailable`] from `arm`, so the absence of a
/// platform mechanism surfaces at `start()` like any other subscription failure.
pub fn for_config(config: &GuardConfig) -> Box<dyn Notifier> {
    match config.backend {
        #[cfg(unix)]
        Backend::Signal => {
            if config.signals.is_empty() {
                Box::new(signal::SignalNotifier::new())
            } else {
                Box::new(signal::SignalNotifier::with_signals(&config.signals))
            }
        }
        #[cfg(windows)]
        Backend::SessionMessage => Box::new(session_message::SessionMessageNotifier::new()),
        #[cfg(all(target_os = "linux", feature = "logind"))]
        Backend::SessionBus => Box::new(session_bus::SessionBusNotifier::new()),
        Backend::Manual => Box::new(ManualNotifier::new()),
        #[allow(unreachable_patterns)]
        other => Box::new(Unsupported(other)),
    }
}

/// Placeholder for a backend missing from this build
#[derive(Debug)]
struct Unsupported(Backend);

impl Notifier for Unsupported {
    fn backend(&self) -> Backend {
        self.0
    }

    fn arm(&mut self, _budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError> {
        let reason = if self.0 == Backend::SessionBus && cfg!(target_os = "linux") {
            "built without the `logind` feature".to_string()
        } else {
            format!("not supported on {}", std::env::consts::OS)
        };
        Err(GuardError::unavailable(self.0, reason))
    }

    fn wait_for_shutdown(&mut self) -> Notification {
        Notification::Lost("unsupported backend".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse_and_display_agree() {
        for backend in Backend::OS_BACKENDS {
            assert_eq!(backend.as_str().parse::<Backend>().unwrap(), backend);
        }
        assert_eq!("logind".parse::<Backend>().unwrap(), Backend::SessionBus);
        assert!("carrier-pigeon".parse::<Backend>().is_err());
    }

    #[test]
    fn platform_default_is_compiled() {
        assert!(Backend::platform_default().is_compiled());
    }

    #[test]
    fn missing_backend_fails_at_arm() {
        let missing = Backend::OS_BACKENDS
            .into_iter()
            .find(|b| !b.is_compiled())
            .expect("at most two OS backends exist per target");
        let config = GuardConfig {
            backend: missing,
            ..Default::default()
        };
        let mut notifier = for_config(&config);
        assert_eq!(notifier.backend(), missing);
        let err = notifier.arm(TimeBudget::default()).err().unwrap();
        assert!(matches!(err, GuardError::NotifierUnavailable { backend, .. } if backend == missing));
    }

    #[cfg(unix)]
    #[test]
    fn signal_reason_display_uses_name() {
        assert_eq!(ShutdownReason::Signal(15).to_string(), "SIGTERM");
    }
}
