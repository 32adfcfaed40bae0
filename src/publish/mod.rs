//! Publication stage
//!
//! Copies every aggregate that exists on disk into three sinks under the
//! output root:
//! - `ParquetSink`: `<out>/parquet/<name>.parquet`
//! - `CsvSink`: `<out>/csv/<name>.csv` with a header row
//! - `SqliteSink`: one table per aggregate in `<out>/sales.db`
//!
//! Missing aggregate files are skipped. Every sink fully replaces what a
//! previous run left behind.

use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span};

use crate::aggregate::AggregateTable;
use crate::engine::Engine;
use crate::error::PipelineResult;

pub mod files;
pub mod sqlite;

pub use files::{CsvSink, ParquetSink};
pub use sqlite::{SQLITE_FILE, SqliteSink};

/// A destination for published aggregates
pub trait Sink {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Copy the full contents of `source` into this sink as `table`
    ///
    /// Returns the file that now holds the table.
    fn publish(
        &mut self,
        engine: &Engine,
        table: AggregateTable,
        source: &Path,
    ) -> PipelineResult<PathBuf>;
}

/// What a publication run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Aggregates copied into every sink
    pub published: Vec<AggregateTable>,
    /// Aggregates with no file on disk
    pub skipped: Vec<AggregateTable>,
    /// Files written or updated, in publication order
    pub files: Vec<PathBuf>,
}

/// Publish every aggregate found in `aggregated_dir` into `output_dir`
pub fn run(aggregated_dir: &Path, output_dir: &Path) -> PipelineResult<PublishSummary> {
    let _span = info_span!("publish").entered();

    let mut parquet = ParquetSink::new(output_dir)?;
    let mut csv = CsvSink::new(output_dir)?;
    let mut sqlite = SqliteSink::open(output_dir)?;
    let engine = Engine::open()?;

    let mut summary = PublishSummary::default();
    {
        let mut sinks: [&mut dyn Sink; 3] = [&mut parquet, &mut csv, &mut sqlite];
        for table in AggregateTable::all() {
            let source = table.path_in(aggregated_dir);
            if !source.exists() {
                debug!(table = table.name(), path = %source.display(), "Aggregate missing, skipping");
                summary.skipped.push(table);
                continue;
            }

            for sink in sinks.iter_mut() {
                let written = sink.publish(&engine, table, &source)?;
                debug!(table = table.name(), sink = sink.kind(), path = %written.display(), "Published");
                if !summary.files.contains(&written) {
                    summary.files.push(written);
                }
            }
            summary.published.push(table);
        }
    }

    engine.close()?;
    sqlite.close()?;

    info!(
        published = summary.published.len(),
        skipped = summary.skipped.len(),
        output = %output_dir.display(),
        "Publication complete"
    );
    Ok(summary)
}
