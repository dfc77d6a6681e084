//! Configuration management
//!
//! Handles:
//! - Database connection settings for the metrics sink
//! - Sampling schedule (cron) and failure backoff
//! - Probe settings (CPU window, monitored mount point)
//!
//! Sources, lowest to highest precedence: defaults, TOML file, environment.
//! Loaded once at startup; never re-read while running.

use crate::error::ConfigError;
use crate::schedule::CronSchedule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GUARDIAN_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "guardian-monitor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub table: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: String,
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub cpu_window_ms: u64,
    pub disk_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            schedule: ScheduleConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://postgres@127.0.0.1:5432/guardian_auth".to_string(),
            table: "guardian_systeminfo".to_string(),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout_secs: 60,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "*/5 * * * *".to_string(),
            backoff_secs: 60,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: 1000,
            disk_path: PathBuf::from("/"),
        }
    }
}

impl ScheduleConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl ProbeConfig {
    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }
}

impl MonitorConfig {
    /// Load from file and process environment.
    ///
    /// `path` wins over `GUARDIAN_MONITOR_CONFIG`; without either, the default
    /// file is read only if it exists.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path).await?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE)).await?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(table) = lookup("GUARDIAN_MONITOR_TABLE") {
            self.database.table = table;
        }
        if let Some(cron) = lookup("GUARDIAN_MONITOR_CRON") {
            self.schedule.cron = cron;
        }
        if let Some(value) = lookup("GUARDIAN_MONITOR_BACKOFF_SECS") {
            self.schedule.backoff_secs = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "GUARDIAN_MONITOR_BACKOFF_SECS",
                value,
            })?;
        }
        if let Some(path) = lookup("GUARDIAN_MONITOR_DISK_PATH") {
            self.probe.disk_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database url is empty".into()));
        }
        if !is_valid_identifier(&self.database.table) {
            return Err(ConfigError::Invalid(format!(
                "table name '{}' is not a plain identifier",
                self.database.table
            )));
        }
        if self.database.max_connections == 0
            || self.database.min_connections > self.database.max_connections
        {
            return Err(ConfigError::Invalid(format!(
                "connection pool bounds {}..{} are invalid",
                self.database.min_connections, self.database.max_connections
            )));
        }
        if self.schedule.backoff_secs == 0 {
            return Err(ConfigError::Invalid("backoff_secs must be at least 1".into()));
        }
        // sysinfo needs this much time between refreshes for a usable CPU reading
        let min_window = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;
        if self.probe.cpu_window() < min_window {
            return Err(ConfigError::Invalid(format!(
                "cpu_window_ms must be at least {}",
                min_window.as_millis()
            )));
        }
        Ok(())
    }

    /// Parse the configured cron expression
    pub fn cron_schedule(&self) -> Result<CronSchedule, crate::error::ScheduleError> {
        CronSchedule::parse(&self.schedule.cron)
    }
}

/// Optionally schema-qualified SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
