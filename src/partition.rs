//! Ingestion-date partitions of the raw layer
//!
//! Raw snapshots live under `<base>/ingestion_date=YYYY-MM-DD/`. The partition
//! key is parsed into a calendar date and the latest partition is picked by
//! date, never by directory-name order.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Partition key used in directory names
pub const PARTITION_KEY: &str = "ingestion_date";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One ingestion-date partition directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionPartition {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl IngestionPartition {
    /// Parse a partition from its directory path
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let value = name.strip_prefix(PARTITION_KEY)?.strip_prefix('=')?;
        let date = NaiveDate::parse_from_str(value, DATE_FORMAT).ok()?;
        Some(Self {
            date,
            path: path.to_path_buf(),
        })
    }
}

/// Directory name for the partition of `date`
pub fn partition_name(date: NaiveDate) -> String {
    format!("{PARTITION_KEY}={}", date.format(DATE_FORMAT))
}

/// Partition directory of `date` under `base`
pub fn partition_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(partition_name(date))
}

/// All well-formed partitions under `base`, oldest first
pub fn discover_partitions(base: &Path) -> PipelineResult<Vec<IngestionPartition>> {
    if !base.exists() {
        return Err(PipelineError::not_found("Raw partition base", base));
    }

    let pattern = format!(
        "{}/{PARTITION_KEY}=*",
        glob::Pattern::escape(&base.to_string_lossy())
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| PipelineError::ConfigError(format!("invalid partition pattern: {e}")))?;

    let mut partitions = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_dir() => match IngestionPartition::from_path(&path) {
                Some(partition) => partitions.push(partition),
                None => debug!(path = %path.display(), "Ignoring malformed partition directory"),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!("Error accessing path: {}", e),
        }
    }

    partitions.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(partitions)
}

/// Most recent partition under `base`
pub fn latest_partition(base: &Path) -> PipelineResult<IngestionPartition> {
    discover_partitions(base)?
        .pop()
        .ok_or_else(|| PipelineError::NoPartitions(base.to_path_buf()))
}
