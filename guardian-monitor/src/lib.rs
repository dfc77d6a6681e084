//! Guardian Monitor - cron-scheduled host metrics sampler
//!
//! Samples CPU, memory, disk and network usage on a cron schedule and
//! appends one record per tick to a metrics sink (Postgres in production):
//! - Interruptible waits between ticks (SIGINT/SIGTERM)
//! - Network traffic reported as deltas between samples
//! - Transient collection/persistence failures absorbed by a fixed backoff

pub mod config;
pub mod daemon;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod shutdown;
pub mod sink;

pub use config::MonitorConfig;
pub use daemon::{LoopState, Monitor, RunSummary, TickOutcome};
pub use error::{CollectionError, ConfigError, MonitorError, ScheduleError, SinkError};
pub use metrics::{HostProbe, HostReading, MetricSample, MetricSampler, NetworkCounters, SysinfoProbe};
pub use schedule::{next_run, wait_seconds, Clock, CronSchedule, MonotonicClock, SystemClock};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};
pub use sink::{MemorySink, MetricSink, PersistedSample, PgSink};
