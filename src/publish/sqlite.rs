//! Embedded relational sink
//!
//! All aggregates share one SQLite file. Every run builds the database from
//! scratch in `sales.db.tmp` and renames it over `sales.db` on close, so the
//! published file depends only on the aggregates and readers never see a
//! half-written database. Each table is created and filled in one transaction.

use std::path::{Path, PathBuf};

use rusqlite::types::Value;

use crate::aggregate::AggregateTable;
use crate::engine::{ColumnInfo, ColumnKind, Engine, parquet_scan, quote_ident};
use crate::error::{PipelineError, PipelineResult};

use super::Sink;

/// Database file name under the output root
pub const SQLITE_FILE: &str = "sales.db";

const STAGING_SUFFIX: &str = "tmp";

fn affinity(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "INTEGER",
        ColumnKind::Real => "REAL",
        ColumnKind::Text => "TEXT",
    }
}

fn cast_for(column: &ColumnInfo) -> String {
    let target = match column.kind {
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Real => "DOUBLE",
        ColumnKind::Text => "VARCHAR",
    };
    format!("CAST({} AS {target})", quote_ident(&column.name))
}

/// One table per aggregate inside `<out>/sales.db`
pub struct SqliteSink {
    path: PathBuf,
    staging: PathBuf,
    conn: rusqlite::Connection,
}

impl SqliteSink {
    /// Start a fresh database under `output_dir`
    ///
    /// The previous `sales.db` stays in place until [`SqliteSink::close`].
    pub fn open(output_dir: &Path) -> PipelineResult<Self> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| PipelineError::io_with_path(output_dir, "creating output directory", e))?;
        let path = output_dir.join(SQLITE_FILE);
        let staging = path.with_extension(format!("db.{STAGING_SUFFIX}"));
        if staging.exists() {
            std::fs::remove_file(&staging).map_err(|e| {
                PipelineError::io_with_path(&staging, "removing stale staging database", e)
            })?;
        }
        let conn = rusqlite::Connection::open(&staging)?;
        Ok(Self {
            path,
            staging,
            conn,
        })
    }

    /// Close the database and move it over the published file
    pub fn close(self) -> PipelineResult<()> {
        self.conn.close().map_err(|(_, e)| PipelineError::from(e))?;
        std::fs::rename(&self.staging, &self.path)
            .map_err(|e| PipelineError::io_with_path(&self.path, "replacing published database", e))
    }

    /// Read every row of `source` as SQLite values
    fn read_rows(
        engine: &Engine,
        source: &Path,
    ) -> PipelineResult<(Vec<ColumnInfo>, Vec<Vec<Value>>)> {
        let scan = parquet_scan(source);
        let columns = engine.describe(&format!("SELECT * FROM {scan}"))?;
        let select = format!(
            "SELECT {} FROM {scan}",
            columns.iter().map(cast_for).collect::<Vec<_>>().join(", ")
        );

        let mut stmt = engine.connection().prepare(&select)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value = match column.kind {
                    ColumnKind::Integer => row
                        .get::<_, Option<i64>>(i)?
                        .map_or(Value::Null, Value::Integer),
                    ColumnKind::Real => row
                        .get::<_, Option<f64>>(i)?
                        .map_or(Value::Null, Value::Real),
                    ColumnKind::Text => row
                        .get::<_, Option<String>>(i)?
                        .map_or(Value::Null, Value::Text),
                };
                record.push(value);
            }
            records.push(record);
        }
        Ok((columns, records))
    }
}

impl Sink for SqliteSink {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn publish(
        &mut self,
        engine: &Engine,
        table: AggregateTable,
        source: &Path,
    ) -> PipelineResult<PathBuf> {
        let (columns, records) = Self::read_rows(engine, source)?;
        let name = quote_ident(table.name());
        let definitions = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), affinity(c.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({definitions});"
        ))?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {name} VALUES ({placeholders})"))?;
            for record in records {
                insert.execute(rusqlite::params_from_iter(record))?;
            }
        }
        tx.commit()?;

        Ok(self.path.clone())
    }
}
