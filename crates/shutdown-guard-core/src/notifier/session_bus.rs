//! systemd-logind backend over the D-Bus system bus.
//!
//! logind broadcasts `PrepareForShutdown(b)` on `org.freedesktop.login1.Manager`:
//! `true` right before a poweroff/reboot, `false` when a pending shutdown is
//! cancelled. While armed the notifier also holds a *delay* inhibitor, which
//! makes logind wait (up to `InhibitDelayMaxSec`) until we release it on
//! acknowledgment.

use super::ShutdownReason;

pub const LOGIN1_DEST: &str = "org.freedesktop.login1";
pub const LOGIN1_PATH: &str = "/org/freedesktop/login1";
pub const MANAGER_IFACE: &str = "org.freedesktop.login1.Manager";
pub const PREPARE_FOR_SHUTDOWN: &str = "PrepareForShutdown";

/// Map the `PrepareForShutdown` argument to a notification.
///
/// Only the "about to shut down" edge counts; the cancel edge is ignored.
pub fn classify_prepare_for_shutdown(active: bool) -> Option<ShutdownReason> {
    active.then_some(ShutdownReason::PrepareForShutdown)
}

#[cfg(feature = "logind")]
pub use bus::SessionBusNotifier;

#[cfg(feature = "logind")]
mod bus {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use dbus::arg::OwnedFd;
    use dbus::blocking::Connection;
    use dbus::message::MatchRule;

    use super::*;
    use crate::config::TimeBudget;
    use crate::error::GuardError;
    use crate::executor::Outcome;
    use crate::notifier::{Backend, Interrupt, Notification, Notifier};

    /// How often a blocked wait rechecks its cancel flag
    const POLL_INTERVAL: Duration = Duration::from_millis(250);

    const METHOD_TIMEOUT: Duration = Duration::from_secs(5);

    struct Armed {
        conn: Connection,
        fired: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
        inhibitor: Option<OwnedFd>,
    }

    #[derive(Default)]
    pub struct SessionBusNotifier {
        armed: Option<Armed>,
    }

    impl std::fmt::Debug for SessionBusNotifier {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SessionBusNotifier")
                .field("armed", &self.armed.is_some())
                .finish()
        }
    }

    impl SessionBusNotifier {
        pub fn new() -> Self {
            Self::default()
        }
    }

    struct FlagInterrupt(Arc<AtomicBool>);

    impl Interrupt for FlagInterrupt {
        fn interrupt(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Ask logind to hold shutdown until the returned fd is closed.
    fn take_delay_inhibitor(conn: &Connection) -> Result<OwnedFd, dbus::Error> {
        let proxy = conn.with_proxy(LOGIN1_DEST, LOGIN1_PATH, METHOD_TIMEOUT);
        let (fd,): (OwnedFd,) = proxy.method_call(
            MANAGER_IFACE,
            "Inhibit",
            (
                "shutdown",
                "shutdown-guard",
                "Running cleanup callbacks",
                "delay",
            ),
        )?;
        Ok(fd)
    }

    impl Notifier for SessionBusNotifier {
        fn backend(&self) -> Backend {
            Backend::SessionBus
        }

        fn arm(&mut self, _budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError> {
            let unavailable = |e: dbus::Error| GuardError::unavailable(Backend::SessionBus, e);
            let conn = Connection::new_system().map_err(unavailable)?;

            let fired = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&fired);
            let rule = MatchRule::new_signal(MANAGER_IFACE, PREPARE_FOR_SHUTDOWN);
            conn.add_match(rule, move |(active,): (bool,), _: &Connection, _: &dbus::Message| {
                match classify_prepare_for_shutdown(active) {
                    Some(_) => flag.store(true, Ordering::SeqCst),
                    None => log::info!("logind cancelled the pending shutdown"),
                }
                true
            })
            .map_err(unavailable)?;

            let inhibitor = match take_delay_inhibitor(&conn) {
                Ok(fd) => {
                    log::debug!("holding logind delay inhibitor");
                    Some(fd)
                }
                Err(e) => {
                    log::warn!("logind delay inhibitor unavailable, shutdown will not wait: {e}");
                    None
                }
            };

            let cancelled = Arc::new(AtomicBool::new(false));
            let interrupt = FlagInterrupt(Arc::clone(&cancelled));
            self.armed = Some(Armed {
                conn,
                fired,
                cancelled,
                inhibitor,
            });
            Ok(Box::new(interrupt))
        }

        fn wait_for_shutdown(&mut self) -> Notification {
            let Some(armed) = self.armed.as_ref() else {
                return Notification::Lost("session bus notifier not armed".to_string());
            };
            loop {
                if armed.cancelled.load(Ordering::SeqCst) {
                    return Notification::Cancelled;
                }
                if armed.fired.load(Ordering::SeqCst) {
                    return Notification::Shutdown(ShutdownReason::PrepareForShutdown);
                }
                if let Err(e) = armed.conn.process(POLL_INTERVAL) {
                    return Notification::Lost(format!("system bus connection lost: {e}"));
                }
            }
        }

        fn acknowledge(&mut self, outcome: Outcome) {
            if let Some(fd) = self.armed.as_mut().and_then(|a| a.inhibitor.take()) {
                drop(fd);
                log::debug!("released logind delay inhibitor ({outcome})");
            }
        }

        fn disarm(&mut self) {
            if self.armed.take().is_some() {
                log::debug!("system bus subscription dropped");
            }
        }
    }
}
