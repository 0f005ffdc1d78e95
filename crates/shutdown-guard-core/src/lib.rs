//! Shutdown Guard Core - run cleanup callbacks before the OS ends the process
//!
//! Registers callbacks, subscribes to the platform's shutdown notification
//! (POSIX signals, Windows session messages, or systemd-logind over D-Bus) and
//! runs every callback exactly once, in registration order, within a shared
//! time budget.

mod coordinator;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod logging;
pub mod notifier;
pub mod registry;
pub mod state;
pub mod wake;

// Re-exports for convenience
pub use config::{DEFAULT_BUDGET, GuardConfig, TimeBudget};
pub use error::{CallbackFailure, GuardError};
pub use executor::{Outcome, ShutdownReport};
pub use guard::Guard;
pub use logging::init_logging;
pub use notifier::{
    Backend, Interrupt, ManualNotifier, ManualTrigger, Notification, Notifier, ShutdownReason,
};
pub use registry::{Callback, CallbackRegistry, Handle};
pub use state::ShutdownState;
