//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use shutdown_guard_core::{Backend, GuardConfig, TimeBudget};

/// Global configuration for shutdown-stamp
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub guard: GuardSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    /// Total callback time budget in milliseconds
    pub budget_ms: u64,
    /// Backend name; platform default when unset
    pub backend: Option<String>,
    /// Signal numbers for the signal backend; empty means INT/TERM/HUP
    pub signals: Vec<i32>,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            budget_ms: TimeBudget::default().limit().as_millis() as u64,
            backend: None,
            signals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    #[serde(deserialize_with = "deserialize_env_path")]
    pub path: PathBuf,
    /// Seconds between "still running" log lines; 0 disables
    pub heartbeat_secs: u64,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shutdown_time.txt"),
            heartbeat_secs: 5,
        }
    }
}

/// Deserialize a path that may be an environment variable reference like ${VAR}
fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand_env_var(&s)
        .map(PathBuf::from)
        .ok_or_else(|| serde::de::Error::custom(format!("environment variable in {s} is not set")))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./shutdown-guard.toml (current directory)
    /// 2. ~/.config/shutdown-guard/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("shutdown-guard.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "shutdown-guard") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the guard settings, CLI overrides taking precedence
    pub fn guard_config(
        &self,
        backend: Option<Backend>,
        budget_ms: Option<u64>,
    ) -> Result<GuardConfig> {
        let backend = match (backend, self.guard.backend.as_deref()) {
            (Some(b), _) => b,
            (None, Some(name)) => name
                .parse::<Backend>()
                .map_err(|e| anyhow::anyhow!(e))
                .context("invalid [guard] backend")?,
            (None, None) => Backend::platform_default(),
        };
        // Nothing in this binary holds a trigger, so a manual guard would wait forever.
        if backend == Backend::Manual {
            anyhow::bail!("the manual backend cannot be driven from the command line");
        }
        #[cfg(unix)]
        if backend == Backend::Signal {
            for &signal in &self.guard.signals {
                shutdown_guard_core::notifier::signal::validate_signal(signal)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("invalid [guard] signals")?;
            }
        }
        Ok(GuardConfig {
            budget: TimeBudget::from_millis(budget_ms.unwrap_or(self.guard.budget_ms)),
            backend,
            signals: self.guard.signals.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.guard.budget_ms, 5_000);
        assert_eq!(config.output.path, PathBuf::from("shutdown_time.txt"));
        assert!(config.guard.backend.is_none());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("SHUTDOWN_STAMP_TEST_VAR", "/var/lib/stamp.txt");
        assert_eq!(
            expand_env_var("${SHUTDOWN_STAMP_TEST_VAR}"),
            Some("/var/lib/stamp.txt".to_string())
        );
        std::env::remove_var("SHUTDOWN_STAMP_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[guard]
budget_ms = 2500
backend = "signal"
signals = [15]

[output]
path = "/tmp/stamp.txt"
heartbeat_secs = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.guard.budget_ms, 2500);
        assert_eq!(config.output.path, PathBuf::from("/tmp/stamp.txt"));
        assert_eq!(config.output.heartbeat_secs, 0);

        let guard = config.guard_config(None, None).unwrap();
        assert_eq!(guard.backend, Backend::Signal);
        assert_eq!(guard.budget, TimeBudget::from_millis(2500));
        assert_eq!(guard.signals, vec![15]);
    }

    #[test]
    fn cli_overrides_file() {
        let config: Config = toml::from_str("[guard]\nbackend = \"signal\"\n").unwrap();
        let guard = config
            .guard_config(Some(Backend::SessionBus), Some(100))
            .unwrap();
        assert_eq!(guard.backend, Backend::SessionBus);
        assert_eq!(guard.budget, TimeBudget::from_millis(100));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config: Config = toml::from_str("[guard]\nbackend = \"smoke-signals\"\n").unwrap();
        let err = config.guard_config(None, None).unwrap_err();
        assert!(format!("{err:#}").contains("unknown backend"));
    }

    #[test]
    fn manual_backend_is_rejected() {
        let config: Config = toml::from_str("[guard]\nbackend = \"manual\"\n").unwrap();
        let err = config.guard_config(None, None).unwrap_err();
        assert!(err.to_string().contains("manual backend"));
        assert!(Config::default()
            .guard_config(Some(Backend::Manual), None)
            .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn uncatchable_signal_is_rejected() {
        for signals in ["[9]", "[-1]", "[200]"] {
            let toml = format!("[guard]\nbackend = \"signal\"\nsignals = {signals}\n");
            let config: Config = toml::from_str(&toml).unwrap();
            let err = config.guard_config(None, None).unwrap_err();
            assert!(format!("{err:#}").contains("invalid [guard] signals"), "{err:#}");
        }
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown-guard.toml");
        std::fs::write(&path, "[output]\nheartbeat_secs = 30\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output.heartbeat_secs, 30);
        assert_eq!(config.guard.budget_ms, 5_000);
    }
}
