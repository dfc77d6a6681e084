//! Error taxonomy for the monitor
//!
//! Startup-fatal kinds (schedule, config, sink connect) are folded into
//! [`MonitorError`]. Per-tick kinds ([`CollectionError`], [`SinkError`] on
//! insert) never leave the scheduler loop.

/// Invalid cron expression or a schedule that never fires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, found {0}")]
    FieldCount(usize),
    #[error("empty item in {field} field")]
    EmptyItem { field: &'static str },
    #[error("invalid value '{value}' in {field} field")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} value {value} outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("reversed range {start}-{end} in {field} field")]
    ReversedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
    #[error("zero step in {field} field")]
    ZeroStep { field: &'static str },
    #[error("schedule '{0}' has no occurrence within the lookahead window")]
    NoOccurrence(String),
}

/// Host metrics could not be read this tick.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("no CPU information available")]
    CpuUnavailable,
    #[error("memory statistics unavailable")]
    MemoryUnavailable,
    #[error("no disk mounted at or above {0}")]
    DiskNotFound(String),
    #[error("metrics probe failed: {0}")]
    Probe(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid table name: {0}")]
    InvalidTable(String),
    #[error("sink rejected sample: {0}")]
    Rejected(String),
    #[error("sink is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Errors that abort the daemon before its first tick.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("metrics sink unavailable: {0}")]
    Sink(#[from] SinkError),
}

impl MonitorError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::Schedule(_) | MonitorError::Config(_) => 2,
            MonitorError::Sink(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MonitorError::from(ScheduleError::FieldCount(3)).exit_code(), 2);
        assert_eq!(
            MonitorError::from(ConfigError::Invalid("x".into())).exit_code(),
            2
        );
        assert_eq!(MonitorError::from(SinkError::Closed).exit_code(), 3);
    }

    #[test]
    fn test_schedule_error_message() {
        let err = ScheduleError::OutOfRange {
            field: "minute",
            value: 75,
            min: 0,
            max: 59,
        };
        assert_eq!(err.to_string(), "minute value 75 outside 0-59");
    }
}
