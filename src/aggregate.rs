//! Aggregation stage: five fixed summaries over the fact table
//!
//! Every aggregate is a full group-by-sum recomputed on each run and written
//! over its previous file. Rows are ordered by the grouping key so identical
//! inputs give identical files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, info_span};

use crate::engine::{Engine, FileFormat, parquet_scan};
use crate::error::{PipelineError, PipelineResult};

/// The fixed set of aggregate tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateTable {
    SalesByDay,
    SalesByMonth,
    SalesByYear,
    SalesByProduct,
    SalesPerOrder,
}

impl AggregateTable {
    /// All aggregates in publication order
    pub fn all() -> [Self; 5] {
        [
            Self::SalesByDay,
            Self::SalesByMonth,
            Self::SalesByYear,
            Self::SalesByProduct,
            Self::SalesPerOrder,
        ]
    }

    /// Table name, also used for file names and relational tables
    pub fn name(&self) -> &'static str {
        match self {
            Self::SalesByDay => "sales_by_day",
            Self::SalesByMonth => "sales_by_month",
            Self::SalesByYear => "sales_by_year",
            Self::SalesByProduct => "sales_by_product",
            Self::SalesPerOrder => "sales_per_order",
        }
    }

    /// File name inside the aggregated layer
    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.name())
    }

    /// Location of this aggregate under `aggregated_dir`
    pub fn path_in(&self, aggregated_dir: &Path) -> PathBuf {
        aggregated_dir.join(self.file_name())
    }

    /// Query over the `order_lines` view
    pub fn query(&self) -> &'static str {
        match self {
            Self::SalesPerOrder => {
                "SELECT OrderID, CAST(OrderDate AS DATE) AS order_date,
                        SUM(Revenue) AS Revenue, CAST(SUM(Quantity) AS BIGINT) AS Quantity
                 FROM order_lines
                 GROUP BY OrderID, CAST(OrderDate AS DATE)
                 ORDER BY OrderID, order_date"
            }
            Self::SalesByDay => {
                "SELECT CAST(OrderDate AS DATE) AS date,
                        SUM(Revenue) AS revenue, CAST(SUM(Quantity) AS BIGINT) AS quantity
                 FROM order_lines
                 GROUP BY CAST(OrderDate AS DATE)
                 ORDER BY date"
            }
            Self::SalesByMonth => {
                "SELECT YEAR(OrderDate) AS year, MONTH(OrderDate) AS month,
                        SUM(Revenue) AS revenue, CAST(SUM(Quantity) AS BIGINT) AS quantity
                 FROM order_lines
                 GROUP BY YEAR(OrderDate), MONTH(OrderDate)
                 ORDER BY year, month"
            }
            Self::SalesByYear => {
                "SELECT YEAR(OrderDate) AS year,
                        SUM(Revenue) AS revenue, CAST(SUM(Quantity) AS BIGINT) AS quantity
                 FROM order_lines
                 GROUP BY YEAR(OrderDate)
                 ORDER BY year"
            }
            Self::SalesByProduct => {
                "SELECT ProductID, ProductName,
                        SUM(Revenue) AS revenue, CAST(SUM(Quantity) AS BIGINT) AS quantity
                 FROM order_lines
                 GROUP BY ProductID, ProductName
                 ORDER BY ProductID NULLS LAST, ProductName"
            }
        }
    }
}

impl std::fmt::Display for AggregateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compute every aggregate from `fact_table` into `aggregated_dir`
pub fn run(
    fact_table: &Path,
    aggregated_dir: &Path,
) -> PipelineResult<BTreeMap<AggregateTable, PathBuf>> {
    let _span = info_span!("aggregate").entered();

    if !fact_table.exists() {
        return Err(PipelineError::not_found("Fact table", fact_table));
    }
    std::fs::create_dir_all(aggregated_dir).map_err(|e| {
        PipelineError::io_with_path(aggregated_dir, "creating aggregated directory", e)
    })?;

    info!(source = %fact_table.display(), "Aggregating order lines");
    let engine = Engine::open()?;
    engine.execute_batch(&format!(
        "CREATE VIEW order_lines AS SELECT * FROM {};",
        parquet_scan(fact_table)
    ))?;

    let mut outputs = BTreeMap::new();
    for table in AggregateTable::all() {
        let out = table.path_in(aggregated_dir);
        engine.copy_to(table.query(), &out, FileFormat::Parquet)?;
        info!(table = table.name(), path = %out.display(), "Wrote aggregate");
        outputs.insert(table, out);
    }

    engine.close()?;
    Ok(outputs)
}
