//! Prometheus metrics definitions and registry state.
//!
//! This module defines all Prometheus metrics exposed by the exporter.
//! Writes are grouped into passes; a scrape never observes a half-applied
//! pass.

use crate::error::{KopiaError, Result};
use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use tracing::debug;

const SOURCE_LABEL: &str = "source";

/// Backup status of a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    Success,
    Failure,
}

impl BackupStatus {
    fn as_gauge(self) -> f64 {
        match self {
            BackupStatus::Success => 1.0,
            BackupStatus::Failure => 0.0,
        }
    }
}

/// Current exported values for one source.
///
/// Size and timestamp stay `None` for a label that has only ever been
/// marked as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSample {
    pub status: BackupStatus,
    pub size_bytes: Option<u64>,
    pub last_backup_unix_time: Option<i64>,
}

/// Outcome of one reconciliation poll, used as the `result` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Success,
    FetchError,
    ParseError,
}

impl PollResult {
    fn as_label(self) -> &'static str {
        match self {
            PollResult::Success => "success",
            PollResult::FetchError => "fetch_error",
            PollResult::ParseError => "parse_error",
        }
    }
}

/// Consistent copy of the domain state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Whether the repository is believed reachable
    pub repository_up: bool,
    /// Samples keyed by source label
    pub samples: BTreeMap<String, MetricSample>,
}

/// Registry of every metric the exporter exposes.
///
/// Domain gauges and their typed mirror live behind one lock; each pass holds
/// it for writing until dropped.
pub struct MetricsRegistry {
    registry: Registry,
    state: RwLock<RegistrySnapshot>,

    // Backup metrics
    backup_status: GaugeVec,
    backup_size_bytes: GaugeVec,
    last_backup_timestamp: GaugeVec,

    // Repository metrics
    repository_status: Gauge,

    // Exporter metrics
    polls_total: IntCounterVec,
    last_poll_timestamp: Gauge,
    snapshots_observed: Gauge,
}

fn register<C>(registry: &Registry, collector: C) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl MetricsRegistry {
    /// Create a new registry with every metric registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let backup_status = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "kopia_backup_status",
                    "Status of the last backup (0=error, 1=success)",
                ),
                &[SOURCE_LABEL],
            )?,
        )?;

        let backup_size_bytes = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "kopia_backup_size_bytes",
                    "Size of the last backup in bytes",
                ),
                &[SOURCE_LABEL],
            )?,
        )?;

        let last_backup_timestamp = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "kopia_last_backup_timestamp",
                    "Timestamp of the last backup",
                ),
                &[SOURCE_LABEL],
            )?,
        )?;

        let repository_status = register(
            &registry,
            Gauge::with_opts(Opts::new(
                "kopia_repository_status",
                "Repository connection status (0=disconnected, 1=connected)",
            ))?,
        )?;

        let polls_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "kopia_exporter_polls_total",
                    "Inventory polls by result (success, fetch_error, parse_error)",
                ),
                &["result"],
            )?,
        )?;

        let last_poll_timestamp = register(
            &registry,
            Gauge::with_opts(Opts::new(
                "kopia_exporter_last_poll_timestamp_seconds",
                "Unix time the last inventory poll finished",
            ))?,
        )?;

        let snapshots_observed = register(
            &registry,
            Gauge::with_opts(Opts::new(
                "kopia_exporter_snapshots_observed",
                "Number of snapshots in the last parsed inventory",
            ))?,
        )?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            state: RwLock::new(RegistrySnapshot::default()),
            backup_status,
            backup_size_bytes,
            last_backup_timestamp,
            repository_status,
            polls_total,
            last_poll_timestamp,
            snapshots_observed,
        })
    }

    /// Start a write pass. Scrapes block until the pass is dropped.
    pub fn begin_pass(&self) -> Pass<'_> {
        Pass {
            metrics: self,
            state: self.state.write(),
        }
    }

    /// Record a successful snapshot for `source`.
    pub fn set_success(&self, source: &str, size_bytes: u64, last_backup_unix_time: i64) {
        self.begin_pass()
            .set_success(source, size_bytes, last_backup_unix_time);
    }

    /// Mark `source` as failed, keeping its last size and timestamp.
    pub fn set_failure(&self, source: &str) {
        self.begin_pass().set_failure(source);
    }

    /// Set whether the repository is reachable.
    pub fn set_repository_status(&self, up: bool) {
        self.begin_pass().set_repository_status(up);
    }

    /// Count a finished poll and stamp its completion time.
    ///
    /// Only touches exporter self-metrics.
    pub fn record_poll(&self, result: PollResult) {
        self.polls_total
            .with_label_values(&[result.as_label()])
            .inc();
        self.last_poll_timestamp
            .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
    }

    /// Consistent copy of repository status and every source sample.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.read().clone()
    }

    /// Sample for a single source, if the label exists.
    pub fn sample(&self, source: &str) -> Option<MetricSample> {
        self.state.read().samples.get(source).copied()
    }

    /// Current repository status.
    pub fn repository_up(&self) -> bool {
        self.state.read().repository_up
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let metric_families = {
            let _state = self.state.read();
            self.registry.gather()
        };

        let encoder = TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| KopiaError::Metrics(e.to_string()))
    }
}

/// An in-progress group of writes.
///
/// Holds the registry's write lock, so readers see either none or all of the
/// writes made through it.
pub struct Pass<'a> {
    metrics: &'a MetricsRegistry,
    state: RwLockWriteGuard<'a, RegistrySnapshot>,
}

impl Pass<'_> {
    /// Record a successful snapshot for `source`.
    pub fn set_success(&mut self, source: &str, size_bytes: u64, last_backup_unix_time: i64) {
        debug!(
            "Source {}: size={} last_backup={}",
            source, size_bytes, last_backup_unix_time
        );
        let m = self.metrics;
        m.backup_status
            .with_label_values(&[source])
            .set(BackupStatus::Success.as_gauge());
        m.backup_size_bytes
            .with_label_values(&[source])
            .set(size_bytes as f64);
        m.last_backup_timestamp
            .with_label_values(&[source])
            .set(last_backup_unix_time as f64);

        self.state.samples.insert(
            source.to_string(),
            MetricSample {
                status: BackupStatus::Success,
                size_bytes: Some(size_bytes),
                last_backup_unix_time: Some(last_backup_unix_time),
            },
        );
    }

    /// Mark `source` as failed, keeping its last size and timestamp.
    pub fn set_failure(&mut self, source: &str) {
        self.metrics
            .backup_status
            .with_label_values(&[source])
            .set(BackupStatus::Failure.as_gauge());

        self.state
            .samples
            .entry(source.to_string())
            .and_modify(|sample| sample.status = BackupStatus::Failure)
            .or_insert(MetricSample {
                status: BackupStatus::Failure,
                size_bytes: None,
                last_backup_unix_time: None,
            });
    }

    /// Set whether the repository is reachable.
    pub fn set_repository_status(&mut self, up: bool) {
        self.metrics
            .repository_status
            .set(if up { 1.0 } else { 0.0 });
        self.state.repository_up = up;
    }

    /// Record how many snapshots the inventory contained.
    pub fn set_snapshots_observed(&mut self, count: usize) {
        self.metrics.snapshots_observed.set(count as f64);
    }
}
