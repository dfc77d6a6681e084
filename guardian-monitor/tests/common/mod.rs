use chrono::{DateTime, TimeZone, Utc};
use guardian_monitor::{
    CollectionError, CronSchedule, HostProbe, HostReading, MemorySink, MetricSampler, Monitor,
    MonotonicClock, NetworkCounters, ShutdownCoordinator,
};
use std::sync::Arc;
use std::time::Duration;

pub type TestMonitor = Monitor<Arc<MemorySink>, SyntheticProbe, Arc<MonotonicClock>>;

/// Probe producing fixed readings with counters growing by `step` per read
pub struct SyntheticProbe {
    pub sent: u64,
    pub step: u64,
}

impl HostProbe for SyntheticProbe {
    fn begin_cpu_window(&mut self) -> Result<(), CollectionError> {
        Ok(())
    }

    fn read(&mut self) -> Result<HostReading, CollectionError> {
        self.sent += self.step;
        Ok(HostReading {
            cpu_core_count: Some(8),
            cpu_load_percent: 42.0,
            memory_used_bytes: 6 << 30,
            memory_total_bytes: 32 << 30,
            disk_used_bytes: 200 << 30,
            disk_total_bytes: 500 << 30,
            network: NetworkCounters {
                sent: self.sent,
                received: self.sent * 2,
            },
        })
    }
}

pub fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 15).unwrap()
}

pub struct Fixture {
    pub monitor: TestMonitor,
    pub sink: Arc<MemorySink>,
    pub shutdown: ShutdownCoordinator,
}

/// Must be called inside a (paused) tokio runtime
pub fn fixture(cron: &str, backoff: Duration) -> Fixture {
    let clock = Arc::new(MonotonicClock::anchored_at(anchor()));
    let sink = Arc::new(MemorySink::new(clock.clone()));
    let shutdown = ShutdownCoordinator::new();
    let monitor = Monitor::new(
        CronSchedule::parse(cron).unwrap(),
        MetricSampler::new(SyntheticProbe { sent: 0, step: 500 }, Duration::from_secs(1)),
        sink.clone(),
        clock,
        shutdown.clone(),
        backoff,
    )
    .unwrap();
    Fixture {
        monitor,
        sink,
        shutdown,
    }
}
