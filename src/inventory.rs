//! Snapshot inventory parsing.
//!
//! Decodes the JSON emitted by `kopia snapshot list --json` into
//! [`SnapshotRecord`]s. A listing either parses completely or not at all.

use crate::error::{KopiaError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One snapshot reported by kopia.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Snapshot manifest ID
    pub id: String,
    /// Backup source, used as the metric label
    pub source: String,
    /// Snapshot start time, when reported
    pub start_time: Option<DateTime<Utc>>,
    /// Snapshot completion time
    pub end_time: DateTime<Utc>,
    /// Snapshot size in bytes
    pub size: u64,
}

impl SnapshotRecord {
    /// Completion time as Unix seconds.
    pub fn end_unix_time(&self) -> i64 {
        self.end_time.timestamp()
    }
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    id: String,
    source: RawSource,
    #[serde(rename = "startTime", default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: DateTime<Utc>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    stats: Option<RawStats>,
}

/// Kopia reports sources as objects; older tooling flattens them to strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Label(String),
    Path {
        host: String,
        #[serde(rename = "userName")]
        user_name: String,
        path: String,
    },
}

impl RawSource {
    fn render(self) -> String {
        match self {
            RawSource::Label(label) => label,
            RawSource::Path {
                host,
                user_name,
                path,
            } => format!("{}@{}:{}", user_name, host, path),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStats {
    #[serde(rename = "totalSize", default)]
    total_size: Option<u64>,
}

impl RawSnapshot {
    fn into_record(self, index: usize) -> Result<SnapshotRecord> {
        let size = self
            .size
            .or_else(|| self.stats.as_ref().and_then(|s| s.total_size))
            .ok_or_else(|| {
                KopiaError::ParseError(format!(
                    "snapshot {} (index {}) has no size",
                    self.id, index
                ))
            })?;

        Ok(SnapshotRecord {
            id: self.id,
            source: self.source.render(),
            start_time: self.start_time,
            end_time: self.end_time,
            size,
        })
    }
}

/// Parse a raw inventory listing.
///
/// Unknown fields are ignored. A missing required field anywhere fails the
/// whole listing.
///
/// # Examples
///
/// ```
/// use kopia_exporter::inventory::parse_inventory;
///
/// let raw = br#"[{"id":"s1","source":"docs","endTime":"2024-01-01T00:00:00Z","size":1000}]"#;
/// let records = parse_inventory(raw).unwrap();
/// assert_eq!(records[0].end_unix_time(), 1704067200);
/// ```
pub fn parse_inventory(raw: &[u8]) -> Result<Vec<SnapshotRecord>> {
    let snapshots: Vec<RawSnapshot> = serde_json::from_slice(raw).map_err(|e| {
        let preview = String::from_utf8_lossy(&raw[..raw.len().min(200)]);
        KopiaError::ParseError(format!("{}. Output preview: {}", e, preview))
    })?;

    snapshots
        .into_iter()
        .enumerate()
        .map(|(index, raw)| raw.into_record(index))
        .collect()
}
