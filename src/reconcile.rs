//! Reconciliation loop.
//!
//! Polls the snapshot inventory on a fixed interval and folds each listing
//! into the [`MetricsRegistry`]. A failed poll never ends the loop.

use crate::client::InventorySource;
use crate::error::Result;
use crate::inventory::parse_inventory;
use crate::metrics::{MetricsRegistry, PollResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drives the inventory source and updates the registry.
pub struct Reconciler<S> {
    source: S,
    metrics: Arc<MetricsRegistry>,
    fallback_source: String,
}

impl<S: InventorySource> Reconciler<S> {
    /// Create a reconciler.
    ///
    /// `fallback_source` labels the status series marked failed when the
    /// inventory cannot be fetched.
    pub fn new(source: S, metrics: Arc<MetricsRegistry>, fallback_source: impl Into<String>) -> Self {
        Self {
            source,
            metrics,
            fallback_source: fallback_source.into(),
        }
    }

    /// Run forever, sleeping `interval` after every poll.
    pub async fn run(self, interval: Duration) {
        info!(
            "Starting reconciliation loop (interval: {}s)",
            interval.as_secs()
        );
        loop {
            self.poll_once().await;
            tokio::time::sleep(interval).await;
        }
    }

    /// Fetch, parse and apply a single inventory listing.
    pub async fn poll_once(&self) -> PollResult {
        let fetched = self.source.fetch_inventory().await;
        let result = self.apply(fetched);
        self.metrics.record_poll(result);
        result
    }

    /// Apply a fetch result to the registry.
    ///
    /// - fetch error: repository down, fallback label failed, samples kept
    /// - parse error: nothing touched
    /// - success: repository up, one sample per source, last record wins
    pub fn apply(&self, fetched: Result<Vec<u8>>) -> PollResult {
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                error!("Error executing kopia: {}", e);
                let mut pass = self.metrics.begin_pass();
                pass.set_repository_status(false);
                pass.set_failure(&self.fallback_source);
                return PollResult::FetchError;
            }
        };

        let records = match parse_inventory(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Error parsing kopia output, keeping previous metrics: {}", e);
                return PollResult::ParseError;
            }
        };

        let mut pass = self.metrics.begin_pass();
        pass.set_repository_status(true);
        for record in &records {
            pass.set_success(&record.source, record.size, record.end_unix_time());
        }
        pass.set_snapshots_observed(records.len());
        drop(pass);

        info!("Reconciled {} snapshots", records.len());
        PollResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KopiaError;
    use crate::metrics::{BackupStatus, MetricSample};

    struct NoSource;

    impl InventorySource for NoSource {
        async fn fetch_inventory(&self) -> Result<Vec<u8>> {
            Ok(b"[]".to_vec())
        }
    }

    fn reconciler() -> Reconciler<NoSource> {
        Reconciler::new(NoSource, Arc::new(MetricsRegistry::new().unwrap()), "default")
    }

    fn fetch_error() -> Result<Vec<u8>> {
        Err(KopiaError::Command {
            command: "snapshot list".to_string(),
            status: "exit status: 1".to_string(),
            output: "ERROR: unable to connect".to_string(),
        })
    }

    #[test]
    fn test_success_sets_each_source() {
        let r = reconciler();
        let raw = br#"[{"id":"s1","source":"docs","endTime":"2024-01-01T00:00:00Z","size":1000}]"#;

        assert_eq!(r.apply(Ok(raw.to_vec())), PollResult::Success);
        assert!(r.metrics.repository_up());
        assert_eq!(
            r.metrics.sample("docs"),
            Some(MetricSample {
                status: BackupStatus::Success,
                size_bytes: Some(1000),
                last_backup_unix_time: Some(1704067200),
            })
        );
    }

    #[test]
    fn test_last_record_per_source_wins() {
        let r = reconciler();
        let raw = br#"[
            {"id":"new","source":"docs","endTime":"2024-01-02T00:00:00Z","size":200},
            {"id":"x","source":"mail","endTime":"2024-01-01T00:00:00Z","size":5},
            {"id":"old","source":"docs","endTime":"2024-01-01T00:00:00Z","size":100}
        ]"#;

        r.apply(Ok(raw.to_vec()));

        let snapshot = r.metrics.snapshot();
        assert_eq!(snapshot.samples.len(), 2);
        assert_eq!(snapshot.samples["docs"].size_bytes, Some(100));
        assert_eq!(snapshot.samples["docs"].last_backup_unix_time, Some(1704067200));
    }

    #[test]
    fn test_fetch_error_marks_fallback_only() {
        let r = reconciler();
        let raw = br#"[{"id":"s1","source":"docs","endTime":"2024-01-01T00:00:00Z","size":1000}]"#;
        r.apply(Ok(raw.to_vec()));
        let docs_before = r.metrics.sample("docs");

        assert_eq!(r.apply(fetch_error()), PollResult::FetchError);

        assert!(!r.metrics.repository_up());
        assert_eq!(r.metrics.sample("docs"), docs_before);
        assert_eq!(
            r.metrics.sample("default").map(|s| s.status),
            Some(BackupStatus::Failure)
        );
    }

    #[test]
    fn test_parse_error_changes_nothing() {
        let r = reconciler();
        let raw = br#"[{"id":"s1","source":"docs","endTime":"2024-01-01T00:00:00Z","size":1000}]"#;
        r.apply(Ok(raw.to_vec()));
        let before = r.metrics.snapshot();

        assert_eq!(
            r.apply(Ok(b"not valid structured data".to_vec())),
            PollResult::ParseError
        );
        assert_eq!(r.metrics.snapshot(), before);
    }

    #[test]
    fn test_parse_error_does_not_restore_repository() {
        let r = reconciler();
        r.apply(fetch_error());
        r.apply(Ok(b"{}".to_vec()));
        assert!(!r.metrics.repository_up());
    }

    #[test]
    fn test_empty_listing_sets_repository_up() {
        let r = reconciler();
        r.apply(fetch_error());
        assert_eq!(r.apply(Ok(b"[]".to_vec())), PollResult::Success);
        assert!(r.metrics.repository_up());
    }

    #[tokio::test]
    async fn test_poll_once_records_result() {
        let r = reconciler();
        assert_eq!(r.poll_once().await, PollResult::Success);
        let text = r.metrics.encode().unwrap();
        assert!(text.contains(r#"kopia_exporter_polls_total{result="success"} 1"#));
    }
}
