//! Raw-copy stage: delimited sources into date-partitioned Parquet snapshots
//!
//! Orders are validated (non-empty, every `OrderDate` a calendar date), renumbered
//! 1..N and stamped with the run's ingestion time; every other source column is
//! carried over as text. Products are optional: a missing file is skipped, a
//! present one must carry `ProductID`, `ProductName` and `Price`, and only those
//! columns are kept. Each source is fully validated before its snapshot is written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use duckdb::types::Value;
use tracing::{info, info_span, warn};

use crate::config::PipelineConfig;
use crate::engine::{Engine, FileFormat, quote_ident};
use crate::error::{PipelineError, PipelineResult};
use crate::partition::partition_dir;

/// Snapshot file name for orders
pub const ORDERS_FILE: &str = "orders.parquet";
/// Snapshot file name for products
pub const PRODUCTS_FILE: &str = "products.parquet";

const ORDER_DATE: &str = "OrderDate";
const PRODUCTS: &str = "products";
const CUSTOMER_ID: &str = "CustomerID";
const ORDER_ID: &str = "OrderID";
/// Columns the snapshot writes itself; source columns with these names are replaced
const ORDER_OWNED_COLUMNS: [&str; 6] = [
    ORDER_ID,
    ORDER_DATE,
    CUSTOMER_ID,
    PRODUCTS,
    "ingestion_ts",
    "ingestion_date",
];
const PRODUCT_COLUMNS: [&str; 3] = ["ProductID", "ProductName", "Price"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// A raw order after validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrder {
    pub order_id: i64,
    pub order_date: NaiveDateTime,
    pub customer_id: Option<String>,
    pub products: Option<String>,
    /// Values of `RawOrders::extra_columns`, in the same order
    pub extra: Vec<Option<String>>,
}

/// The validated orders source
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrders {
    /// Source columns carried over verbatim
    pub extra_columns: Vec<String>,
    pub rows: Vec<RawOrder>,
}

/// A raw product after validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawProduct {
    /// Identifier exactly as it appears in the source, `None` when blank
    pub product_id: Option<String>,
    pub product_name: String,
    pub price: Option<f64>,
}

/// One snapshot file written by this stage
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub rows: usize,
}

/// Everything written by one raw-copy run
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub ingestion_date: NaiveDate,
    pub orders: SnapshotFile,
    pub products: SnapshotFile,
}

/// Parse an order date in any of the accepted layouts
pub fn parse_order_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

fn open_csv(path: &Path) -> PipelineResult<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(PipelineError::from)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn require_columns(
    path: &Path,
    headers: &csv::StringRecord,
    required: &[&str],
) -> PipelineResult<Vec<usize>> {
    let missing: Vec<String> = required
        .iter()
        .filter(|c| column_index(headers, c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing,
        });
    }
    Ok(required
        .iter()
        .filter_map(|c| column_index(headers, c))
        .collect())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Read and validate the orders source
pub fn read_orders(path: &Path) -> PipelineResult<RawOrders> {
    let mut reader = open_csv(path)?;
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        return Err(PipelineError::EmptySource(path.to_path_buf()));
    }

    let indices = require_columns(path, &headers, &[ORDER_DATE, PRODUCTS])?;
    let (date_idx, products_idx) = (indices[0], indices[1]);
    let customer_idx = column_index(&headers, CUSTOMER_ID);
    let extra: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !ORDER_OWNED_COLUMNS.contains(name))
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut orders = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let raw_date = record.get(date_idx).unwrap_or_default();
        let order_date = parse_order_date(raw_date).ok_or_else(|| PipelineError::InvalidDate {
            path: path.to_path_buf(),
            column: ORDER_DATE.to_string(),
            row: i + 1,
            value: raw_date.to_string(),
        })?;
        orders.push(RawOrder {
            order_id: i as i64 + 1,
            order_date,
            customer_id: customer_idx.and_then(|idx| non_empty(record.get(idx))),
            products: non_empty(record.get(products_idx)),
            extra: extra
                .iter()
                .map(|(idx, _)| non_empty(record.get(*idx)))
                .collect(),
        });
    }
    Ok(RawOrders {
        extra_columns: extra.into_iter().map(|(_, name)| name).collect(),
        rows: orders,
    })
}

/// Read and validate the products source
pub fn read_products(path: &Path) -> PipelineResult<Vec<RawProduct>> {
    let mut reader = open_csv(path)?;
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        return Err(PipelineError::EmptySource(path.to_path_buf()));
    }

    let indices = require_columns(path, &headers, &PRODUCT_COLUMNS)?;
    let (id_idx, name_idx, price_idx) = (indices[0], indices[1], indices[2]);

    let mut products = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let raw_price = record.get(price_idx).unwrap_or_default();
        let price = match raw_price.parse::<f64>() {
            Ok(price) => Some(price),
            Err(_) if raw_price.is_empty() => None,
            Err(_) => {
                warn!(
                    path = %path.display(),
                    row = i + 1,
                    value = raw_price,
                    "Unparseable Price, treating as missing"
                );
                None
            }
        };

        products.push(RawProduct {
            product_id: non_empty(record.get(id_idx)),
            product_name: record.get(name_idx).unwrap_or_default().to_string(),
            price,
        });
    }
    Ok(products)
}

fn create_partition(raw_base: &Path, date: NaiveDate) -> PipelineResult<PathBuf> {
    let dir = partition_dir(raw_base, date);
    std::fs::create_dir_all(&dir)
        .map_err(|e| PipelineError::io_with_path(&dir, "creating raw partition", e))?;
    Ok(dir)
}

fn write_orders(orders: &RawOrders, out: &Path, ingested_at: DateTime<Utc>) -> PipelineResult<()> {
    let ingestion_ts = ingested_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    let ingestion_date = ingested_at.date_naive().to_string();
    let extra: Vec<String> = orders.extra_columns.iter().map(|c| quote_ident(c)).collect();

    let mut definitions =
        vec!["OrderID BIGINT, OrderDate VARCHAR, CustomerID VARCHAR, products VARCHAR".to_string()];
    definitions.extend(extra.iter().map(|c| format!("{c} VARCHAR")));
    let placeholders = vec!["?"; 4 + extra.len()].join(", ");

    let engine = Engine::open()?;
    engine.execute_batch(&format!("CREATE TABLE orders ({});", definitions.join(", ")))?;
    {
        let mut stmt = engine
            .connection()
            .prepare(&format!("INSERT INTO orders VALUES ({placeholders})"))?;
        let text = |value: Option<&String>| value.map_or(Value::Null, |v| Value::Text(v.clone()));
        for order in &orders.rows {
            let mut row = vec![
                Value::BigInt(order.order_id),
                Value::Text(order.order_date.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
                text(order.customer_id.as_ref()),
                text(order.products.as_ref()),
            ];
            row.extend(order.extra.iter().map(|v| text(v.as_ref())));
            stmt.execute(duckdb::params_from_iter(row))?;
        }
    }

    let carried: String = extra.iter().map(|c| format!("{c}, ")).collect();
    let query = format!(
        "SELECT OrderID, CAST(OrderDate AS TIMESTAMP) AS OrderDate, CustomerID, products, {carried}
                '{ingestion_ts}' AS ingestion_ts, DATE '{ingestion_date}' AS ingestion_date
         FROM orders ORDER BY OrderID"
    );
    engine.copy_to(&query, out, FileFormat::Parquet)?;
    engine.close()
}

fn write_products(
    products: &[RawProduct],
    out: &Path,
    ingested_at: DateTime<Utc>,
) -> PipelineResult<()> {
    let ingestion_ts = ingested_at.to_rfc3339_opts(SecondsFormat::Micros, true);

    let engine = Engine::open()?;
    engine.execute_batch(
        "CREATE TABLE products (
            row_no BIGINT, ProductID VARCHAR, ProductName VARCHAR, Price DOUBLE
        );",
    )?;
    {
        let mut stmt = engine
            .connection()
            .prepare("INSERT INTO products VALUES (?1, ?2, ?3, ?4)")?;
        for (i, product) in products.iter().enumerate() {
            stmt.execute(duckdb::params![
                i as i64,
                product.product_id.as_deref(),
                product.product_name,
                product.price,
            ])?;
        }
    }

    let query = format!(
        "SELECT ProductID, ProductName, Price, '{ingestion_ts}' AS ingestion_ts
         FROM products ORDER BY row_no"
    );
    engine.copy_to(&query, out, FileFormat::Parquet)?;
    engine.close()
}

/// Snapshot the orders source into the partition of `ingested_at`
pub fn ingest_orders(
    source: &Path,
    raw_orders_dir: &Path,
    ingested_at: DateTime<Utc>,
) -> PipelineResult<SnapshotFile> {
    info!(source = %source.display(), "Ingesting orders");
    let orders = read_orders(source)?;
    snapshot_orders(&orders, raw_orders_dir, ingested_at)
}

fn snapshot_orders(
    orders: &RawOrders,
    raw_orders_dir: &Path,
    ingested_at: DateTime<Utc>,
) -> PipelineResult<SnapshotFile> {
    let dir = create_partition(raw_orders_dir, ingested_at.date_naive())?;
    let out = dir.join(ORDERS_FILE);
    write_orders(orders, &out, ingested_at)?;

    info!(path = %out.display(), rows = orders.rows.len(), "Wrote orders snapshot");
    Ok(SnapshotFile {
        path: out,
        rows: orders.rows.len(),
    })
}

/// Snapshot the products source, or `None` when the source file is absent
pub fn ingest_products(
    source: &Path,
    raw_products_dir: &Path,
    ingested_at: DateTime<Utc>,
) -> PipelineResult<Option<SnapshotFile>> {
    if !source.exists() {
        info!(source = %source.display(), "Products source not found, skipping");
        return Ok(None);
    }

    info!(source = %source.display(), "Ingesting products");
    let products = read_products(source)?;
    snapshot_products(&products, raw_products_dir, ingested_at).map(Some)
}

fn snapshot_products(
    products: &[RawProduct],
    raw_products_dir: &Path,
    ingested_at: DateTime<Utc>,
) -> PipelineResult<SnapshotFile> {
    let dir = create_partition(raw_products_dir, ingested_at.date_naive())?;
    let out = dir.join(PRODUCTS_FILE);
    write_products(products, &out, ingested_at)?;

    info!(path = %out.display(), rows = products.len(), "Wrote products snapshot");
    Ok(SnapshotFile {
        path: out,
        rows: products.len(),
    })
}

/// Run the raw-copy stage for both sources
///
/// Both sources must exist and pass validation before anything is written.
pub fn run(config: &PipelineConfig, ingested_at: DateTime<Utc>) -> PipelineResult<RawSnapshot> {
    let _span = info_span!("raw_copy", ingestion_date = %ingested_at.date_naive()).entered();

    if !config.orders_csv.exists() {
        return Err(PipelineError::not_found("Orders file", &config.orders_csv));
    }
    if !config.products_csv.exists() {
        return Err(PipelineError::not_found("Products file", &config.products_csv));
    }

    info!(
        orders = %config.orders_csv.display(),
        products = %config.products_csv.display(),
        "Validating sources"
    );
    let orders = read_orders(&config.orders_csv)?;
    let products = read_products(&config.products_csv)?;

    let orders = snapshot_orders(&orders, &config.raw_orders_dir(), ingested_at)?;
    let products = snapshot_products(&products, &config.raw_products_dir(), ingested_at)?;

    Ok(RawSnapshot {
        ingestion_date: ingested_at.date_naive(),
        orders,
        products,
    })
}
