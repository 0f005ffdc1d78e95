//! POSIX signal backend.
//!
//! The installed handler belongs to `signal-hook`: it only records the signal
//! and writes one byte to a self-pipe. The supervising thread reads the pipe in
//! [`SignalNotifier::wait_for_shutdown`], so no callback code ever runs in
//! handler context.
//!
//! signal-hook never reinstalls `SIG_DFL` once its handler is in place, so each
//! watched signal also gets a conditional default action. It is enabled
//! whenever no notifier in the process is watching that signal, which keeps a
//! stopped or finished guard from swallowing termination requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use signal_hook::consts::{FORBIDDEN, SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle as SignalsHandle, Signals};

use super::{Backend, Interrupt, Notification, Notifier, ShutdownReason};
use crate::config::TimeBudget;
use crate::error::GuardError;

/// Interrupt, terminate, hangup
pub const DEFAULT_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// signal-hook's iterator backend only handles signal numbers below this
const SIGNAL_LIMIT: i32 = 128;

/// Reject signals signal-hook would panic on instead of reporting an error.
pub fn validate_signal(signal: i32) -> Result<(), String> {
    if signal <= 0 || signal >= SIGNAL_LIMIT {
        return Err(format!("signal number {signal} is out of range"));
    }
    if FORBIDDEN.contains(&signal) {
        return Err(format!("{} cannot be caught", signal_name(signal)));
    }
    Ok(())
}

fn signal_name(signal: i32) -> String {
    signal_hook::low_level::signal_name(signal)
        .map(str::to_string)
        .unwrap_or_else(|| format!("signal {signal}"))
}

/// Default-action fallback for one signal, installed once per process.
struct Fallback {
    signal: i32,
    /// True while nobody watches `signal`: the default action runs.
    idle: Arc<AtomicBool>,
    watchers: usize,
}

static FALLBACKS: Mutex<Vec<Fallback>> = parking_lot::const_mutex(Vec::new());

/// Mark `signals` as watched, installing their fallbacks on first use.
fn watch(signals: &[i32]) -> std::io::Result<()> {
    let mut fallbacks = FALLBACKS.lock();
    for (i, &signal) in signals.iter().enumerate() {
        if let Some(fallback) = fallbacks.iter_mut().find(|f| f.signal == signal) {
            fallback.watchers += 1;
            fallback.idle.store(false, Ordering::SeqCst);
            continue;
        }
        let idle = Arc::new(AtomicBool::new(false));
        if let Err(e) = signal_hook::flag::register_conditional_default(signal, Arc::clone(&idle)) {
            release(&mut fallbacks, &signals[..i]);
            return Err(e);
        }
        fallbacks.push(Fallback {
            signal,
            idle,
            watchers: 1,
        });
    }
    Ok(())
}

fn unwatch(signals: &[i32]) {
    release(&mut FALLBACKS.lock(), signals);
}

fn release(fallbacks: &mut [Fallback], signals: &[i32]) {
    for &signal in signals {
        if let Some(fallback) = fallbacks.iter_mut().find(|f| f.signal == signal) {
            fallback.watchers = fallback.watchers.saturating_sub(1);
            if fallback.watchers == 0 {
                fallback.idle.store(true, Ordering::SeqCst);
            }
        }
    }
}

pub struct SignalNotifier {
    signals: Vec<i32>,
    active: Option<Signals>,
}

impl std::fmt::Debug for SignalNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalNotifier")
            .field("signals", &self.signals)
            .field("armed", &self.active.is_some())
            .finish()
    }
}

impl Default for SignalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalNotifier {
    pub fn new() -> Self {
        Self::with_signals(&DEFAULT_SIGNALS)
    }

    pub fn with_signals(signals: &[i32]) -> Self {
        Self {
            signals: signals.to_vec(),
            active: None,
        }
    }

    pub fn signals(&self) -> &[i32] {
        &self.signals
    }
}

struct SignalInterrupt(SignalsHandle);

impl Interrupt for SignalInterrupt {
    fn interrupt(&self) {
        // Closing wakes a blocked `forever()` and ends the iterator for good.
        self.0.close();
    }
}

impl Notifier for SignalNotifier {
    fn backend(&self) -> Backend {
        Backend::Signal
    }

    fn arm(&mut self, _budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError> {
        let unavailable = |e: String| GuardError::unavailable(Backend::Signal, e);
        if self.signals.is_empty() {
            return Err(unavailable("no signals to watch".to_string()));
        }
        for &signal in &self.signals {
            validate_signal(signal).map_err(unavailable)?;
        }

        let signals = Signals::new(&self.signals).map_err(|e| unavailable(e.to_string()))?;
        if let Err(e) = watch(&self.signals) {
            signals.handle().close();
            return Err(unavailable(format!("cannot install default-action fallback: {e}")));
        }
        let handle = signals.handle();
        self.active = Some(signals);
        log::debug!("watching signals {:?}", self.signals);
        Ok(Box::new(SignalInterrupt(handle)))
    }

    fn wait_for_shutdown(&mut self) -> Notification {
        let Some(signals) = self.active.as_mut() else {
            return Notification::Lost("signal notifier not armed".to_string());
        };
        match signals.forever().next() {
            Some(sig) => Notification::Shutdown(ShutdownReason::Signal(sig)),
            None => Notification::Cancelled,
        }
    }

    fn disarm(&mut self) {
        if let Some(signals) = self.active.take() {
            signals.handle().close();
            unwatch(&self.signals);
            log::debug!("signal subscription dropped, default actions restored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_is_int_term_hup() {
        assert_eq!(SignalNotifier::new().signals(), &[SIGINT, SIGTERM, SIGHUP]);
    }

    #[test]
    fn forbidden_signal_is_unavailable() {
        let mut notifier = SignalNotifier::with_signals(&[signal_hook::consts::SIGKILL]);
        let err = notifier.arm(TimeBudget::default()).err().unwrap();
        assert!(matches!(
            err,
            GuardError::NotifierUnavailable {
                backend: Backend::Signal,
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_signals_are_unavailable() {
        for signal in [-1, 0, 200] {
            let mut notifier = SignalNotifier::with_signals(&[SIGTERM, signal]);
            let err = notifier.arm(TimeBudget::default()).err().unwrap();
            assert_eq!(
                err,
                GuardError::unavailable(
                    Backend::Signal,
                    format!("signal number {signal} is out of range")
                )
            );
        }
    }

    #[test]
    fn validate_accepts_catchable_signals() {
        for signal in DEFAULT_SIGNALS {
            assert_eq!(validate_signal(signal), Ok(()));
        }
        let err = validate_signal(signal_hook::consts::SIGSTOP).unwrap_err();
        assert!(err.ends_with("cannot be caught"), "{err}");
    }

    #[test]
    fn empty_signal_set_is_unavailable() {
        let mut notifier = SignalNotifier::with_signals(&[]);
        assert!(notifier.arm(TimeBudget::default()).is_err());
    }

    #[test]
    fn fallback_is_idle_only_without_watchers() {
        // SIGWINCH is used by no other test in this binary.
        let signal = signal_hook::consts::SIGWINCH;
        let idle = || {
            FALLBACKS
                .lock()
                .iter()
                .find(|f| f.signal == signal)
                .map(|f| f.idle.load(Ordering::SeqCst))
        };
        let mut first = SignalNotifier::with_signals(&[signal]);
        let mut second = SignalNotifier::with_signals(&[signal]);
        let _a = first.arm(TimeBudget::default()).unwrap();
        let _b = second.arm(TimeBudget::default()).unwrap();
        assert_eq!(idle(), Some(false));
        first.disarm();
        assert_eq!(idle(), Some(false));
        second.disarm();
        assert_eq!(idle(), Some(true));
        second.disarm();
        assert_eq!(idle(), Some(true));
    }

    #[test]
    fn interrupt_before_wait_cancels() {
        // SIGUSR2 keeps this test away from the default set used elsewhere.
        let mut notifier = SignalNotifier::with_signals(&[signal_hook::consts::SIGUSR2]);
        let interrupt = notifier.arm(TimeBudget::default()).unwrap();
        interrupt.interrupt();
        assert_eq!(notifier.wait_for_shutdown(), Notification::Cancelled);
        notifier.disarm();
    }

    #[test]
    fn raised_signal_is_reported() {
        let mut notifier = SignalNotifier::with_signals(&[signal_hook::consts::SIGUSR1]);
        let _interrupt = notifier.arm(TimeBudget::default()).unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).unwrap();
        assert_eq!(
            notifier.wait_for_shutdown(),
            Notification::Shutdown(ShutdownReason::Signal(signal_hook::consts::SIGUSR1))
        );
        notifier.disarm();
    }
}
