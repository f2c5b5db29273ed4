//! CLI configuration file
//!
//! `gradmin.json` holds where the simulated fleet lives and the engine
//! tunables. Every field has a default; the file is validated on load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::context::EngineSettings;
use crate::observability::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Fleet state file, relative to the configuration file
    #[serde(default = "default_fleet_file")]
    pub fleet_file: String,

    /// Interval between polls of remote state (optional, default 500ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before a state transition wait gives up (optional, default 60)
    #[serde(default = "default_state_wait_attempts")]
    pub state_wait_attempts: u32,

    /// Status probe workers (optional, default 4)
    #[serde(default = "default_status_workers")]
    pub status_workers: usize,

    /// Sync timeout for operations given none; absent waits forever
    #[serde(default)]
    pub default_sync_timeout_secs: Option<u64>,

    /// Minimum log severity written to stderr (optional, default WARN)
    #[serde(default = "default_log_level")]
    pub log_level: Severity,

    /// Ask on the terminal before dangerous actions (default: false)
    #[serde(default)]
    pub interactive: bool,
}

fn default_fleet_file() -> String {
    "gradmin-fleet.json".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_state_wait_attempts() -> u32 {
    60
}
fn default_status_workers() -> usize {
    4
}
fn default_log_level() -> Severity {
    Severity::Warn
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fleet_file: default_fleet_file(),
            poll_interval_ms: default_poll_interval_ms(),
            state_wait_attempts: default_state_wait_attempts(),
            status_workers: default_status_workers(),
            default_sync_timeout_secs: None,
            log_level: default_log_level(),
            interactive: false,
        }
    }
}

const MAX_STATUS_WORKERS: usize = 64;

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::config_error(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Write a configuration with all defaults. Fails if the file exists.
    pub fn init(path: &Path) -> CliResult<Self> {
        if path.exists() {
            return Err(CliError::already_initialized(path.display()));
        }
        let config = Config::default();
        fs::write(path, serde_json::to_string_pretty(&config)?)
            .map_err(|e| CliError::config_error(format!("Failed to write config: {}", e)))?;
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.fleet_file.trim().is_empty() {
            return Err(CliError::config_error("fleet_file must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(CliError::config_error("poll_interval_ms must be > 0"));
        }
        if self.state_wait_attempts == 0 {
            return Err(CliError::config_error("state_wait_attempts must be > 0"));
        }
        if self.status_workers == 0 || self.status_workers > MAX_STATUS_WORKERS {
            return Err(CliError::config_error(format!(
                "status_workers must be between 1 and {}",
                MAX_STATUS_WORKERS
            )));
        }
        Ok(())
    }

    /// Fleet file location, resolved against the configuration file's directory.
    pub fn fleet_path(&self, config_path: &Path) -> PathBuf {
        let fleet = Path::new(&self.fleet_file);
        if fleet.is_absolute() {
            return fleet.to_path_buf();
        }
        config_path
            .parent()
            .map(|dir| dir.join(fleet))
            .unwrap_or_else(|| fleet.to_path_buf())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            state_wait_attempts: self.state_wait_attempts,
            status_workers: self.status_workers,
            default_sync_timeout: self.default_sync_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("gradmin.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{}");
        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fleet_path(&path), dir.path().join("gradmin-fleet.json"));
        assert_eq!(config.engine_settings().poll_interval, Duration::from_millis(500));
        assert_eq!(config.engine_settings().default_sync_timeout, None);
    }

    #[test]
    fn test_fields_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"poll_interval_ms": 5, "default_sync_timeout_secs": 30, "log_level": "TRACE", "interactive": true}"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, Severity::Trace);
        assert!(config.interactive);
        let settings = config.engine_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(5));
        assert_eq!(settings.default_sync_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        for body in [
            r#"{"poll_interval_ms": 0}"#,
            r#"{"status_workers": 0}"#,
            r#"{"status_workers": 65}"#,
            r#"{"fleet_file": " "}"#,
            r#"{"data_dir": "/tmp"}"#,
            "not json",
        ] {
            let path = write_config(&dir, body);
            let err = Config::load(&path).unwrap_err();
            assert_eq!(err.code_str(), "GRADMIN_CLI_CONFIG_ERROR", "{}", body);
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code_str(), "GRADMIN_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gradmin.json");
        Config::init(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        let err = Config::init(&path).unwrap_err();
        assert_eq!(err.code_str(), "GRADMIN_CLI_ALREADY_INITIALIZED");
    }

    #[test]
    fn test_absolute_fleet_path_kept() {
        let config = Config {
            fleet_file: "/var/lib/gradmin/fleet.json".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.fleet_path(Path::new("/etc/gradmin.json")),
            PathBuf::from("/var/lib/gradmin/fleet.json")
        );
    }
}
