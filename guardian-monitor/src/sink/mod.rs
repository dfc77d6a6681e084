//! Metric sinks
//!
//! The scheduler loop only depends on [`MetricSink::insert`]. Records are
//! append-only; the sink assigns `collected_at`.

use crate::config::{is_valid_identifier, DatabaseConfig};
use crate::error::SinkError;
use crate::metrics::MetricSample;
use crate::schedule::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Persist one sample
    async fn insert(&self, sample: &MetricSample) -> Result<(), SinkError>;

    /// Release held resources. Safe to call more than once.
    async fn close(&self) {}
}

#[async_trait]
impl<T: MetricSink + ?Sized> MetricSink for Arc<T> {
    async fn insert(&self, sample: &MetricSample) -> Result<(), SinkError> {
        (**self).insert(sample).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Postgres sink writing one row per sample
pub struct PgSink {
    pool: PgPool,
    insert_sql: String,
}

impl PgSink {
    /// Connect and verify the database is reachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SinkError> {
        if !is_valid_identifier(&config.table) {
            return Err(SinkError::InvalidTable(config.table.clone()));
        }

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Connected to metrics database (table: {})", config.table);

        Ok(Self {
            pool,
            insert_sql: insert_statement(&config.table),
        })
    }
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} \
         (cpu_count, cpu_total_load, memory_used, memory_total, \
          disk_used, disk_total, network_upload, network_download) \
         VALUES ($1, $2::numeric, $3, $4, $5, $6, $7, $8)"
    )
}

/// Postgres BIGINT is signed
fn to_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetricSink for PgSink {
    async fn insert(&self, sample: &MetricSample) -> Result<(), SinkError> {
        if self.pool.is_closed() {
            return Err(SinkError::Closed);
        }

        sqlx::query(&self.insert_sql)
            .bind(i32::try_from(sample.cpu_core_count).unwrap_or(i32::MAX))
            .bind(f64::from(sample.cpu_load_percent))
            .bind(to_bigint(sample.memory_used_bytes))
            .bind(to_bigint(sample.memory_total_bytes))
            .bind(to_bigint(sample.disk_used_bytes))
            .bind(to_bigint(sample.disk_total_bytes))
            .bind(to_bigint(sample.network_upload_bytes))
            .bind(to_bigint(sample.network_download_bytes))
            .execute(&self.pool)
            .await?;

        debug!("Sample persisted");
        Ok(())
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Database pool closed");
        }
    }
}

/// A sample with the timestamp assigned on insert
#[derive(Debug, Clone, Serialize)]
pub struct PersistedSample {
    #[serde(flatten)]
    pub sample: MetricSample,
    pub collected_at: DateTime<Utc>,
}

/// In-process sink used for dry runs and tests
pub struct MemorySink {
    clock: Arc<dyn Clock>,
    /// Oldest records are evicted beyond this many
    limit: Option<usize>,
    records: Mutex<VecDeque<PersistedSample>>,
    failures_pending: Mutex<u32>,
    closed: Mutex<u32>,
}

impl MemorySink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limit(clock, None)
    }

    /// Keep at most `limit` of the most recent records
    pub fn bounded(clock: Arc<dyn Clock>, limit: usize) -> Self {
        Self::with_limit(clock, Some(limit.max(1)))
    }

    fn with_limit(clock: Arc<dyn Clock>, limit: Option<usize>) -> Self {
        Self {
            clock,
            limit,
            records: Mutex::new(VecDeque::new()),
            failures_pending: Mutex::new(0),
            closed: Mutex::new(0),
        }
    }

    /// Make the next `count` inserts fail
    pub fn fail_next(&self, count: u32) {
        *self.failures_pending.lock() = count;
    }

    pub fn records(&self) -> Vec<PersistedSample> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> u32 {
        *self.closed.lock()
    }
}

#[async_trait]
impl MetricSink for MemorySink {
    async fn insert(&self, sample: &MetricSample) -> Result<(), SinkError> {
        {
            let mut pending = self.failures_pending.lock();
            if *pending > 0 {
                *pending -= 1;
                return Err(SinkError::Rejected("scripted failure".into()));
            }
        }
        if *self.closed.lock() > 0 {
            return Err(SinkError::Closed);
        }

        let mut records = self.records.lock();
        if let Some(limit) = self.limit {
            while records.len() >= limit {
                records.pop_front();
            }
        }
        records.push_back(PersistedSample {
            sample: sample.clone(),
            collected_at: self.clock.now(),
        });
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock() += 1;
    }
}
