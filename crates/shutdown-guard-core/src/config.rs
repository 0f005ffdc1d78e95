//! Guard configuration: time budget and notifier backend

use std::time::Duration;

use crate::notifier::Backend;

/// Default ceiling on total callback time for one shutdown episode
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

/// Wall-clock ceiling shared by all callbacks of one shutdown episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget(Duration);

impl TimeBudget {
    pub const fn new(limit: Duration) -> Self {
        Self(limit)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub const fn limit(self) -> Duration {
        self.0
    }
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self(DEFAULT_BUDGET)
    }
}

impl std::fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

/// Runtime configuration for a [`Guard`](crate::Guard)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub budget: TimeBudget,
    pub backend: Backend,
    /// Signals watched by the signal backend; empty means the default set
    /// (`SIGINT`, `SIGTERM`, `SIGHUP`). Ignored by other backends.
    pub signals: Vec<i32>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            budget: TimeBudget::default(),
            backend: Backend::platform_default(),
            signals: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_is_five_seconds() {
        assert_eq!(TimeBudget::default().limit(), Duration::from_secs(5));
        assert_eq!(GuardConfig::default().budget, TimeBudget::default());
    }

    #[test]
    fn budget_display_in_millis() {
        assert_eq!(TimeBudget::from_millis(1500).to_string(), "1500ms");
    }
}
