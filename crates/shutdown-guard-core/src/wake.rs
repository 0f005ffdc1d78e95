//! Blocking wake-up primitives built on `Mutex + Condvar`.
//!
//! [`Doorbell`] carries the first notification to the supervising thread;
//! [`Latch`] holds an OS callback thread until the episode is acknowledged;
//! [`SessionHold`] combines the two for OS callbacks that must not return early.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::notifier::{Notification, ShutdownReason};

/// One-shot mailbox for a [`Notification`]. The first ring wins; later rings
/// are dropped, which is what suppresses duplicate OS notifications.
#[derive(Debug, Default)]
pub struct Doorbell {
    slot: Mutex<Option<Notification>>,
    cond: Condvar,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a shutdown notification. Returns false if one was already pending.
    pub fn ring(&self, reason: ShutdownReason) -> bool {
        self.deliver(Notification::Shutdown(reason))
    }

    /// Cancel the wait. Sticky: a later [`wait`](Self::wait) returns immediately.
    pub fn cancel(&self) -> bool {
        self.deliver(Notification::Cancelled)
    }

    pub fn lose(&self, message: impl Into<String>) -> bool {
        self.deliver(Notification::Lost(message.into()))
    }

    fn deliver(&self, notification: Notification) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(notification);
        self.cond.notify_all();
        true
    }

    /// Block until something is delivered. Leaves the value in place so that
    /// every waiter sees the same notification.
    pub fn wait(&self) -> Notification {
        let mut slot = self.slot.lock();
        loop {
            if let Some(n) = slot.as_ref() {
                return n.clone();
            }
            self.cond.wait(&mut slot);
        }
    }

    pub fn is_rung(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Open-once gate with a bounded wait.
#[derive(Debug, Default)]
pub struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Wait up to `timeout` for [`open`](Self::open). Returns whether it opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cond.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

/// Ring-then-hold handshake for an OS callback whose return lets the OS
/// proceed with ending the session.
///
/// [`end_session`](Self::end_session) delivers the reason and then keeps the
/// calling thread until [`release`](Self::release) or `hold` elapses.
#[derive(Debug)]
pub struct SessionHold {
    bell: Arc<Doorbell>,
    released: Latch,
    hold: Duration,
}

impl SessionHold {
    pub fn new(bell: Arc<Doorbell>, hold: Duration) -> Self {
        Self {
            bell,
            released: Latch::new(),
            hold,
        }
    }

    pub fn bell(&self) -> &Arc<Doorbell> {
        &self.bell
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Ring, then block until released. Returns whether the release came in time.
    pub fn end_session(&self, reason: ShutdownReason) -> bool {
        if self.bell.ring(reason) {
            log::info!("{reason} received, holding session end for cleanup");
        }
        let released = self.released.wait_timeout(self.hold);
        if !released {
            log::warn!("cleanup not acknowledged within {:?}, releasing {reason}", self.hold);
        }
        released
    }

    /// Let every current and future `end_session` call return.
    pub fn release(&self) {
        self.released.open();
    }
}
