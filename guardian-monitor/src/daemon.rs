//! Scheduler loop
//!
//! Drives the tick cycle `Waiting -> Collecting -> Persisting -> Waiting`.
//! Collection and sink failures divert into a fixed backoff and never end
//! the loop; only shutdown does.

use crate::config::MonitorConfig;
use crate::error::{MonitorError, ScheduleError};
use crate::metrics::{HostProbe, MetricSample, MetricSampler};
use crate::schedule::{Clock, CronSchedule};
use crate::shutdown::ShutdownCoordinator;
use crate::sink::MetricSink;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scheduler loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Waiting,
    Collecting,
    Persisting,
    /// Fixed wait after a failed tick
    Backoff,
    ShuttingDown,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Persisted,
    /// Collection or insert failed; the sample for this tick is gone
    Dropped,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks_persisted: u64,
    pub ticks_dropped: u64,
}

/// Main daemon state
pub struct Monitor<S, P, C> {
    schedule: CronSchedule,
    sampler: MetricSampler<P>,
    sink: S,
    clock: C,
    shutdown: ShutdownCoordinator,
    backoff: Duration,
    state: LoopState,
    summary: RunSummary,
    sink_closed: bool,
}

impl<S, P, C> Monitor<S, P, C>
where
    S: MetricSink,
    P: HostProbe,
    C: Clock,
{
    /// Create a monitor. Fails if the schedule never fires from `clock.now()`.
    pub fn new(
        schedule: CronSchedule,
        sampler: MetricSampler<P>,
        sink: S,
        clock: C,
        shutdown: ShutdownCoordinator,
        backoff: Duration,
    ) -> Result<Self, ScheduleError> {
        let first = schedule.next_after(clock.now())?;
        debug!("First scheduled tick at {}", first);

        Ok(Self {
            schedule,
            sampler,
            sink,
            clock,
            shutdown,
            backoff,
            state: LoopState::Waiting,
            summary: RunSummary::default(),
            sink_closed: false,
        })
    }

    /// Build from configuration with an already connected sink
    pub fn from_config(
        config: &MonitorConfig,
        probe: P,
        sink: S,
        clock: C,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let schedule = config.cron_schedule()?;
        let sampler = MetricSampler::new(probe, config.probe.cpu_window());
        Ok(Self::new(
            schedule,
            sampler,
            sink,
            clock,
            shutdown,
            config.schedule.backoff(),
        )?)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn enter(&mut self, state: LoopState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Establish the network baseline. The sample is discarded.
    pub async fn warm_up(&mut self) {
        info!("Collecting initial network stats...");
        match self.sampler.collect().await {
            Ok(_) => debug!("Network baseline established"),
            Err(e) => warn!("Warm-up collection failed, first tick reports zero traffic: {}", e),
        }
    }

    /// Run one full cycle: wait for the next trigger, collect, persist.
    pub async fn tick(&mut self) -> Result<TickOutcome, ScheduleError> {
        self.enter(LoopState::Waiting);
        let now = self.clock.now();
        let wait = self.schedule.wait_duration(now)?;
        debug!("Next tick in {}s", wait.as_secs());

        if !self.shutdown.sleep_or_shutdown(wait).await {
            self.enter(LoopState::ShuttingDown);
            return Ok(TickOutcome::Shutdown);
        }

        self.enter(LoopState::Collecting);
        let sample = match self.sampler.collect().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Failed to collect metrics: {}", e);
                return Ok(self.back_off().await);
            }
        };

        if !self.shutdown.is_running() {
            self.enter(LoopState::ShuttingDown);
            return Ok(TickOutcome::Shutdown);
        }

        self.enter(LoopState::Persisting);
        if let Err(e) = self.sink.insert(&sample).await {
            warn!("Failed to persist metrics: {}", e);
            return Ok(self.back_off().await);
        }

        self.summary.ticks_persisted += 1;
        log_sample(&sample);
        self.enter(LoopState::Waiting);
        Ok(TickOutcome::Persisted)
    }

    async fn back_off(&mut self) -> TickOutcome {
        self.summary.ticks_dropped += 1;
        self.enter(LoopState::Backoff);
        info!("Backing off for {}s", self.backoff.as_secs());

        if self.shutdown.sleep_or_shutdown(self.backoff).await {
            self.enter(LoopState::Waiting);
            TickOutcome::Dropped
        } else {
            self.enter(LoopState::ShuttingDown);
            TickOutcome::Shutdown
        }
    }

    /// Release the sink. Runs once no matter how often it is called.
    pub async fn close(&mut self) {
        self.enter(LoopState::ShuttingDown);
        if !self.sink_closed {
            self.sink_closed = true;
            self.sink.close().await;
        }
    }

    /// Warm up, then tick until shutdown.
    pub async fn run(mut self) -> Result<RunSummary, MonitorError> {
        info!("Starting system monitoring (schedule: {})", self.schedule);
        self.warm_up().await;

        let result = loop {
            match self.tick().await {
                Ok(TickOutcome::Shutdown) => break Ok(()),
                Ok(_) => {}
                Err(e) => {
                    error!("Schedule stopped producing ticks: {}", e);
                    break Err(MonitorError::from(e));
                }
            }
        };

        self.close().await;
        info!(
            "Shutting down monitor ({} persisted, {} dropped)",
            self.summary.ticks_persisted, self.summary.ticks_dropped
        );
        result.map(|_| self.summary)
    }
}

fn log_sample(sample: &MetricSample) {
    info!("{}", sample.summary());
}
