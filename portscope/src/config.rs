//! Monitor configuration, loaded from YAML. Every key is optional.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Identical chunks within the window before the source is recycled.
    pub threshold: u32,
    pub window_ms: u64,
    /// Pause between closing and reopening a stuck source.
    pub reconnect_pause_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            threshold: 10,
            window_ms: 1000,
            reconnect_pause_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Identical lines rendered before collapsing into a summary.
    pub threshold: u32,
    pub window_ms: u64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        SuppressionConfig {
            threshold: 5,
            window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub flush_interval_ms: u64,
    /// Rendered characters kept per sink before eviction.
    pub sink_capacity: usize,
    pub watchdog: WatchdogConfig,
    pub suppression: SuppressionConfig,
    pub loader_batch_lines: usize,
    pub activity_cooldown_ms: u64,
    pub log_dir: PathBuf,
    pub rules_path: PathBuf,
    pub scan_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            flush_interval_ms: 50,
            sink_capacity: crate::sink::DEFAULT_CAPACITY,
            watchdog: WatchdogConfig::default(),
            suppression: SuppressionConfig::default(),
            loader_batch_lines: crate::loader::DEFAULT_BATCH_LINES,
            activity_cooldown_ms: 1000,
            log_dir: PathBuf::from("Logs"),
            rules_path: PathBuf::from("highlight_rules.json"),
            scan_interval_ms: 2000,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<MonitorConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<MonitorConfig, ConfigError> {
        if text.trim().is_empty() {
            return Ok(MonitorConfig::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn activity_cooldown(&self) -> Duration {
        Duration::from_millis(self.activity_cooldown_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = MonitorConfig::from_yaml(
            "flush_interval_ms: 20\nwatchdog:\n  threshold: 4\nlog_dir: /tmp/serial\n",
        )
        .unwrap();
        assert_eq!(config.flush_interval(), Duration::from_millis(20));
        assert_eq!(config.watchdog.threshold, 4);
        assert_eq!(config.watchdog.window_ms, 1000);
        assert_eq!(config.suppression, SuppressionConfig::default());
        assert_eq!(config.log_dir, PathBuf::from("/tmp/serial"));
        assert_eq!(config.sink_capacity, 5_000_000);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(MonitorConfig::from_yaml("\n").unwrap(), MonitorConfig::default());
    }

    #[test]
    fn bad_yaml_is_an_error() {
        assert!(matches!(
            MonitorConfig::from_yaml("flush_interval_ms: [1, 2]"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
