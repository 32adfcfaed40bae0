//! Short-lived embedded analytical sessions
//!
//! Every stage that needs SQL opens its own in-memory DuckDB session and closes
//! it before returning. No connection outlives a stage.

use std::path::Path;

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// On-disk format for `COPY ... TO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
}

impl FileFormat {
    fn copy_options(&self) -> &'static str {
        match self {
            Self::Parquet => "(FORMAT PARQUET)",
            Self::Csv => "(FORMAT CSV, HEADER true, DELIMITER ',')",
        }
    }

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }
}

/// Coarse column type, enough to pick a storage class in another database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    /// Classify a DuckDB type name as reported by `DESCRIBE`
    pub fn from_duckdb_type(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        match upper.as_str() {
            "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" | "HUGEINT" | "UTINYINT"
            | "USMALLINT" | "UINTEGER" | "UBIGINT" | "BOOLEAN" => Self::Integer,
            "FLOAT" | "DOUBLE" | "REAL" => Self::Real,
            _ if upper.starts_with("DECIMAL") => Self::Real,
            _ => Self::Text,
        }
    }
}

/// A column as reported by `DESCRIBE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub kind: ColumnKind,
}

/// In-memory DuckDB session
pub struct Engine {
    conn: duckdb::Connection,
}

impl Engine {
    /// Open a single-threaded in-memory session
    pub fn open() -> PipelineResult<Self> {
        let conn = duckdb::Connection::open_in_memory()?;
        conn.execute_batch("SET threads TO 1;")?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for prepared statements
    pub fn connection(&self) -> &duckdb::Connection {
        &self.conn
    }

    /// Run one or more statements
    pub fn execute_batch(&self, sql: &str) -> PipelineResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Write the result of `query` to `target`, replacing any existing file
    pub fn copy_to(&self, query: &str, target: &Path, format: FileFormat) -> PipelineResult<()> {
        let sql = format!(
            "COPY ({query}) TO {} {}",
            path_literal(target),
            format.copy_options()
        );
        debug!(target = %target.display(), format = format.extension(), "Copying query result");
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// Count rows of a table, view or parenthesised query
    pub fn row_count(&self, relation: &str) -> PipelineResult<i64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {relation}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }

    /// Describe the columns produced by `query`
    pub fn describe(&self, query: &str) -> PipelineResult<Vec<ColumnInfo>> {
        let mut stmt = self.conn.prepare(&format!("DESCRIBE {query}"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut columns = Vec::new();
        for row in rows {
            let (name, type_name) = row?;
            let kind = ColumnKind::from_duckdb_type(&type_name);
            columns.push(ColumnInfo {
                name,
                type_name,
                kind,
            });
        }
        Ok(columns)
    }

    /// Close the session, surfacing any error from the engine
    pub fn close(self) -> PipelineResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| PipelineError::EngineError(e.to_string()))
    }
}

/// SQL string literal for a filesystem path
pub fn path_literal(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", normalized.replace('\'', "''"))
}

/// Quote an identifier for DuckDB or SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table function scanning a single Parquet file
pub fn parquet_scan(path: &Path) -> String {
    format!("read_parquet({})", path_literal(path))
}
