//! Guard lifecycle state held in a single atomic byte
//!
//! Lock-free so it stays usable from restricted contexts (signal handlers,
//! console control threads).

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a guard.
///
/// ```text
/// Idle ──start──▶ Armed ──notification──▶ ShuttingDown ──▶ Completed
///   │               │
///   └────stop───────┴──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Idle = 0,
    Armed = 1,
    ShuttingDown = 2,
    Completed = 3,
    Stopped = 4,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Armed,
            2 => Self::ShuttingDown,
            3 => Self::Completed,
            _ => Self::Stopped,
        }
    }

    /// True once the irreversible shutdown transition has happened
    pub fn is_shutting_down_or_done(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Completed)
    }
}

impl std::fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Armed => write!(f, "armed"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Atomic cell holding a [`ShutdownState`].
///
/// Every transition is a compare-and-swap; the first transition out of a
/// state wins and all competitors observe the failure.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(ShutdownState::Idle as u8))
    }

    pub(crate) fn load(&self) -> ShutdownState {
        ShutdownState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move `from` → `to`. Returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        from: ShutdownState,
        to: ShutdownState,
    ) -> Result<(), ShutdownState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| log::debug!("guard state {from} -> {to}"))
            .map_err(ShutdownState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_idle() {
        assert_eq!(AtomicState::new().load(), ShutdownState::Idle);
    }

    #[test]
    fn transition_from_wrong_state_reports_actual() {
        let state = AtomicState::new();
        let err = state
            .transition(ShutdownState::Armed, ShutdownState::ShuttingDown)
            .unwrap_err();
        assert_eq!(err, ShutdownState::Idle);
        assert_eq!(state.load(), ShutdownState::Idle);
    }

    #[test]
    fn only_one_concurrent_transition_wins() {
        let state = Arc::new(AtomicState::new());
        state
            .transition(ShutdownState::Idle, ShutdownState::Armed)
            .unwrap();
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..16)
            .map(|i| {
                let state = Arc::clone(&state);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    let to = if i % 2 == 0 {
                        ShutdownState::ShuttingDown
                    } else {
                        ShutdownState::Stopped
                    };
                    if state.transition(ShutdownState::Armed, to).is_ok() {
                        winners.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(winners.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_ne!(state.load(), ShutdownState::Armed);
    }

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(ShutdownState::ShuttingDown.to_string(), "shutting-down");
        assert_eq!(ShutdownState::Idle.to_string(), "idle");
    }
}
