//! The polsync config file (`config.toml` in the config directory)

use crate::paths;
use anyhow::{Context, Result};
use converge::{ConflictPolicy, FailurePolicy, Mode, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by every command. A missing file means defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolsyncConfig {
    /// Principal recorded as lock holder; defaults to the login name
    pub principal: Option<String>,

    /// Submit the first batch of a run in strict mode
    pub first_batch_strict: bool,

    /// Mode for batches after the first
    pub mode: Mode,

    pub failure_policy: FailurePolicy,

    /// Copy behavior when a destination object already exists
    pub on_conflict: ConflictPolicy,

    /// Write the request/response audit trail to the state directory
    pub audit: bool,

    /// Directory for diagnostic logs of failed batches
    pub logs_dir: Option<String>,

    pub retry: RetrySettings,
}

impl Default for PolsyncConfig {
    fn default() -> Self {
        Self {
            principal: None,
            first_batch_strict: true,
            mode: Mode::default(),
            failure_policy: FailurePolicy::default(),
            on_conflict: ConflictPolicy::default(),
            audit: false,
            logs_dir: None,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_factor: settings.backoff_factor.max(1.0),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl PolsyncConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Lock-holder identity for this run
    pub fn principal(&self) -> String {
        self.principal
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "polsync".to_string())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.logs_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => Ok(paths::state_dir()?.join("logs")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PolsyncConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.first_batch_strict);
        assert_eq!(config.failure_policy, FailurePolicy::Hard);
        assert_eq!(config.on_conflict, ConflictPolicy::Skip);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
principal = "netops"
failure_policy = "soft"
on_conflict = "overwrite"
logs_dir = "/var/log/polsync"

[retry]
max_attempts = 5
base_delay_ms = 100
"#,
        )
        .unwrap();

        let config = PolsyncConfig::load_from(&path).unwrap();
        assert_eq!(config.principal(), "netops");
        assert_eq!(config.failure_policy, FailurePolicy::Soft);
        assert_eq!(config.on_conflict, ConflictPolicy::Overwrite);
        assert!(config.first_batch_strict);
        assert_eq!(config.logs_dir().unwrap(), PathBuf::from("/var/log/polsync"));

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "failure_policy = \"sometimes\"\n").unwrap();
        let err = PolsyncConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_defaults_serialize() {
        let text = PolsyncConfig::default().to_toml().unwrap();
        assert!(text.contains("first_batch_strict = true"));
        assert!(text.contains("[retry]"));
    }
}
