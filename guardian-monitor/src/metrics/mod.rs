//! Host metrics sampling
//!
//! Provides one consistent snapshot per tick:
//! - CPU load over a fixed measurement window and physical core count
//! - Memory used/total
//! - Disk used/total for the monitored mount point
//! - Network upload/download deltas against the previous sample

use crate::error::CollectionError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One persisted metrics record (maps onto the `guardian_systeminfo` row)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub cpu_core_count: u32,
    pub cpu_load_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network_upload_bytes: u64,
    pub network_download_bytes: u64,
}

impl MetricSample {
    /// Single-line human summary for the log
    pub fn summary(&self) -> String {
        format!(
            "CPU: {:.1}%, Memory: {:.2}GB/{:.2}GB, Disk: {:.2}GB/{:.2}GB, Net: ↑{} ↓{}",
            self.cpu_load_percent,
            self.memory_used_bytes as f64 / GB,
            self.memory_total_bytes as f64 / GB,
            self.disk_used_bytes as f64 / GB,
            self.disk_total_bytes as f64 / GB,
            format_bytes(self.network_upload_bytes),
            format_bytes(self.network_download_bytes),
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Cumulative interface byte counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkCounters {
    pub sent: u64,
    pub received: u64,
}

/// Raw values read from the host at the end of the CPU window
#[derive(Debug, Clone, PartialEq)]
pub struct HostReading {
    pub cpu_core_count: Option<usize>,
    pub cpu_load_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network: NetworkCounters,
}

/// Source of raw host readings
pub trait HostProbe: Send {
    /// Start the CPU measurement window
    fn begin_cpu_window(&mut self) -> Result<(), CollectionError>;

    /// Read everything; CPU load covers the time since `begin_cpu_window`
    fn read(&mut self) -> Result<HostReading, CollectionError>;
}

/// Last observed network counters, owned by one sampler.
#[derive(Debug, Default)]
pub struct NetworkBaseline {
    last: Option<NetworkCounters>,
}

impl NetworkBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<NetworkCounters> {
        self.last
    }

    /// Replace the baseline with `current` and return (upload, download)
    /// since the previous one. Counter decreases clamp to 0.
    pub fn advance(&mut self, current: NetworkCounters) -> (u64, u64) {
        let delta = match self.last {
            Some(prev) => {
                if current.sent < prev.sent || current.received < prev.received {
                    debug!(
                        "Network counters went backwards ({:?} -> {:?}), treating as reset",
                        prev, current
                    );
                }
                (
                    current.sent.saturating_sub(prev.sent),
                    current.received.saturating_sub(prev.received),
                )
            }
            None => (0, 0),
        };
        self.last = Some(current);
        delta
    }
}

/// Collects [`MetricSample`]s and keeps the network baseline between them.
pub struct MetricSampler<P> {
    probe: P,
    cpu_window: Duration,
    baseline: NetworkBaseline,
}

impl<P: HostProbe> MetricSampler<P> {
    pub fn new(probe: P, cpu_window: Duration) -> Self {
        Self {
            probe,
            cpu_window,
            baseline: NetworkBaseline::new(),
        }
    }

    pub fn baseline(&self) -> &NetworkBaseline {
        &self.baseline
    }

    /// Take one sample. Suspends for the CPU window; the baseline is only
    /// replaced when the read succeeds.
    pub async fn collect(&mut self) -> Result<MetricSample, CollectionError> {
        self.probe.begin_cpu_window()?;
        tokio::time::sleep(self.cpu_window).await;
        let reading = self.probe.read()?;

        let (upload, download) = self.baseline.advance(reading.network);

        Ok(MetricSample {
            cpu_core_count: reading.cpu_core_count.unwrap_or(1).max(1) as u32,
            cpu_load_percent: clamp_percent(reading.cpu_load_percent),
            memory_used_bytes: reading.memory_used_bytes.min(reading.memory_total_bytes),
            memory_total_bytes: reading.memory_total_bytes,
            disk_used_bytes: reading.disk_used_bytes.min(reading.disk_total_bytes),
            disk_total_bytes: reading.disk_total_bytes,
            network_upload_bytes: upload,
            network_download_bytes: download,
        })
    }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// [`HostProbe`] backed by `sysinfo`
pub struct SysinfoProbe {
    sys: System,
    disks: Disks,
    networks: Networks,
    disk_path: PathBuf,
}

impl SysinfoProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            disk_path: disk_path.into(),
        }
    }

    fn root_disk(&self) -> Option<(u64, u64)> {
        // Longest mount point that contains the target path
        self.disks
            .list()
            .iter()
            .filter(|d| self.disk_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| {
                // sysinfo has no free-block count; reserved blocks count as used
                let total = d.total_space();
                (total.saturating_sub(d.available_space()), total)
            })
    }

    fn network_totals(&self) -> NetworkCounters {
        self.networks
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .fold(NetworkCounters::default(), |acc, (_, data)| NetworkCounters {
                sent: acc.sent.saturating_add(data.total_transmitted()),
                received: acc.received.saturating_add(data.total_received()),
            })
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.eq_ignore_ascii_case("loopback")
}

impl HostProbe for SysinfoProbe {
    fn begin_cpu_window(&mut self) -> Result<(), CollectionError> {
        self.sys.refresh_cpu_usage();
        if self.sys.cpus().is_empty() {
            return Err(CollectionError::CpuUnavailable);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<HostReading, CollectionError> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh_list();
        self.networks.refresh_list();

        if self.sys.cpus().is_empty() {
            return Err(CollectionError::CpuUnavailable);
        }

        let memory_total_bytes = self.sys.total_memory();
        if memory_total_bytes == 0 {
            return Err(CollectionError::MemoryUnavailable);
        }

        let (disk_used_bytes, disk_total_bytes) = self
            .root_disk()
            .ok_or_else(|| CollectionError::DiskNotFound(display_path(&self.disk_path)))?;

        Ok(HostReading {
            cpu_core_count: self.sys.physical_core_count(),
            cpu_load_percent: self.sys.global_cpu_info().cpu_usage(),
            memory_used_bytes: self.sys.used_memory(),
            memory_total_bytes,
            disk_used_bytes,
            disk_total_bytes,
            network: self.network_totals(),
        })
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Probe returning scripted network counters
    struct ScriptedProbe {
        counters: VecDeque<NetworkCounters>,
        fail_next_read: bool,
    }

    impl ScriptedProbe {
        fn new(sent: &[u64]) -> Self {
            Self {
                counters: sent
                    .iter()
                    .map(|&s| NetworkCounters { sent: s, received: s * 2 })
                    .collect(),
                fail_next_read: false,
            }
        }
    }

    impl HostProbe for ScriptedProbe {
        fn begin_cpu_window(&mut self) -> Result<(), CollectionError> {
            Ok(())
        }

        fn read(&mut self) -> Result<HostReading, CollectionError> {
            if std::mem::take(&mut self.fail_next_read) {
                return Err(CollectionError::Probe("scripted failure".into()));
            }
            let network = self.counters.pop_front().unwrap_or_default();
            Ok(HostReading {
                cpu_core_count: None,
                cpu_load_percent: 140.0,
                memory_used_bytes: 9_000,
                memory_total_bytes: 8_000,
                disk_used_bytes: 100,
                disk_total_bytes: 1_000,
                network,
            })
        }
    }

    fn sampler(sent: &[u64]) -> MetricSampler<ScriptedProbe> {
        MetricSampler::new(ScriptedProbe::new(sent), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_has_zero_network_delta() {
        let mut sampler = sampler(&[1000]);
        let sample = sampler.collect().await.unwrap();
        assert_eq!(sample.network_upload_bytes, 0);
        assert_eq!(sample.network_download_bytes, 0);
        assert_eq!(
            sampler.baseline().current(),
            Some(NetworkCounters { sent: 1000, received: 2000 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sample_reports_delta() {
        let mut sampler = sampler(&[1000, 1500]);
        sampler.collect().await.unwrap();
        let sample = sampler.collect().await.unwrap();
        assert_eq!(sample.network_upload_bytes, 500);
        assert_eq!(sample.network_download_bytes, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_reset_clamps_to_zero() {
        let mut sampler = sampler(&[1500, 200, 700]);
        sampler.collect().await.unwrap();
        let reset = sampler.collect().await.unwrap();
        assert_eq!(reset.network_upload_bytes, 0);
        assert_eq!(reset.network_download_bytes, 0);
        // baseline moved to the post-reset value
        let after = sampler.collect().await.unwrap();
        assert_eq!(after.network_upload_bytes, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_keeps_baseline() {
        let mut sampler = sampler(&[1000, 1600]);
        sampler.collect().await.unwrap();
        sampler.probe.fail_next_read = true;
        assert!(matches!(
            sampler.collect().await,
            Err(CollectionError::Probe(_))
        ));
        assert_eq!(sampler.baseline().current().map(|c| c.sent), Some(1000));
        let sample = sampler.collect().await.unwrap();
        assert_eq!(sample.network_upload_bytes, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_values_are_clamped() {
        let sample = sampler(&[0]).collect().await.unwrap();
        assert_eq!(sample.cpu_core_count, 1);
        assert_eq!(sample.cpu_load_percent, 100.0);
        assert_eq!(sample.memory_used_bytes, sample.memory_total_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_waits_cpu_window() {
        let mut sampler = sampler(&[0]);
        let started = tokio::time::Instant::now();
        sampler.collect().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_summary_format() {
        let sample = MetricSample {
            cpu_core_count: 4,
            cpu_load_percent: 12.46,
            memory_used_bytes: 2 * 1024 * 1024 * 1024,
            memory_total_bytes: 8 * 1024 * 1024 * 1024,
            disk_used_bytes: 0,
            disk_total_bytes: 1024 * 1024 * 1024,
            network_upload_bytes: 512,
            network_download_bytes: 3 * 1024 * 1024,
        };
        assert_eq!(
            sample.summary(),
            "CPU: 12.5%, Memory: 2.00GB/8.00GB, Disk: 0.00GB/1.00GB, Net: ↑512B ↓3.0MB"
        );
    }

    #[test]
    fn test_loopback_filter() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("wlo1"));
    }

    #[tokio::test]
    async fn test_sysinfo_probe_collects() {
        let mut sampler = MetricSampler::new(SysinfoProbe::new("/"), Duration::from_millis(250));
        let sample = match sampler.collect().await {
            Ok(sample) => sample,
            // minimal containers may not expose a mounted root
            Err(CollectionError::DiskNotFound(_)) => return,
            Err(e) => panic!("collection failed: {e}"),
        };
        assert!(sample.cpu_core_count >= 1);
        assert!(sample.memory_total_bytes > 0);
        assert!(sample.memory_used_bytes <= sample.memory_total_bytes);
        assert!((0.0..=100.0).contains(&sample.cpu_load_percent));
        assert_eq!(sample.network_upload_bytes, 0);
    }
}
