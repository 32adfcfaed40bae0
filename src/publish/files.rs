//! File sinks: a Parquet copy and a CSV export per aggregate

use std::path::{Path, PathBuf};

use crate::aggregate::AggregateTable;
use crate::engine::{Engine, FileFormat, parquet_scan};
use crate::error::{PipelineError, PipelineResult};

use super::Sink;

fn create_sink_dir(dir: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PipelineError::io_with_path(dir, "creating sink directory", e))
}

/// Copy `source` to `dir/<table>.<ext>` in `format`
fn copy_table(
    engine: &Engine,
    dir: &Path,
    table: AggregateTable,
    source: &Path,
    format: FileFormat,
) -> PipelineResult<PathBuf> {
    let target = dir.join(format!("{}.{}", table.name(), format.extension()));
    engine.copy_to(
        &format!("SELECT * FROM {}", parquet_scan(source)),
        &target,
        format,
    )?;
    Ok(target)
}

/// Columnar copy under `<out>/parquet/`
#[derive(Debug, Clone)]
pub struct ParquetSink {
    dir: PathBuf,
}

impl ParquetSink {
    pub fn new(output_dir: &Path) -> PipelineResult<Self> {
        let dir = output_dir.join("parquet");
        create_sink_dir(&dir)?;
        Ok(Self { dir })
    }
}

impl Sink for ParquetSink {
    fn kind(&self) -> &'static str {
        "parquet"
    }

    fn publish(
        &mut self,
        engine: &Engine,
        table: AggregateTable,
        source: &Path,
    ) -> PipelineResult<PathBuf> {
        copy_table(engine, &self.dir, table, source, FileFormat::Parquet)
    }
}

/// Comma-delimited export with a header row under `<out>/csv/`
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(output_dir: &Path) -> PipelineResult<Self> {
        let dir = output_dir.join("csv");
        create_sink_dir(&dir)?;
        Ok(Self { dir })
    }
}

impl Sink for CsvSink {
    fn kind(&self) -> &'static str {
        "csv"
    }

    fn publish(
        &mut self,
        engine: &Engine,
        table: AggregateTable,
        source: &Path,
    ) -> PipelineResult<PathBuf> {
        copy_table(engine, &self.dir, table, source, FileFormat::Csv)
    }
}
