//! Refinement stage: one enriched fact table from the latest raw snapshots
//!
//! Each order's embedded product list is exploded into line items, which are
//! left-joined to the latest product snapshot. Unmatched lines keep an empty
//! name and a zero price, so revenue for them is zero.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::engine::{Engine, FileFormat, parquet_scan, path_literal};
use crate::error::{PipelineError, PipelineResult};
use crate::partition::latest_partition;
use crate::raw::{ORDERS_FILE, PRODUCTS_FILE};

/// An order as read back from the raw snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOrder {
    pub order_id: i64,
    pub order_date: NaiveDateTime,
    pub customer_id: Option<String>,
    pub products: Option<String>,
}

/// One (order, product, quantity) line item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub order_id: i64,
    pub order_date: NaiveDateTime,
    pub customer_id: Option<String>,
    /// Product identifier as text, `None` when absent or not a scalar
    pub product_id: Option<String>,
    pub quantity: i64,
}

/// Counters from exploding a batch of orders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplodeStats {
    pub orders: usize,
    pub lines: usize,
    /// Orders whose product list could not be parsed
    pub malformed: usize,
}

/// Result of a refinement run
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutput {
    pub path: PathBuf,
    pub orders_partition: NaiveDate,
    pub products_partition: Option<NaiveDate>,
    pub rows: usize,
    pub stats: ExplodeStats,
}

/// Parse an embedded product list, tolerating single-quoted pseudo-JSON
///
/// Returns `None` when the text is not a JSON array after quote normalisation.
pub fn parse_product_list(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(&text.replace('\'', "\"")) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Product ids are matched as text; integral numbers lose any `.0`
fn coerce_product_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(i.to_string()),
            (None, Some(f)) if f.is_finite() && f.fract() == 0.0 => Some((f as i64).to_string()),
            _ => Some(n.to_string()),
        },
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        _ => None,
    }
}

fn coerce_quantity(value: Option<&Value>) -> i64 {
    let truncated = |f: f64| if f.is_finite() { f.trunc() as i64 } else { 0 };
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| n.as_f64().map_or(0, truncated)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .unwrap_or_else(|_| s.parse::<f64>().map_or(0, truncated))
        }
        _ => 0,
    }
}

/// Expand every order's product list into line items
///
/// An order whose list is missing or malformed contributes no lines.
pub fn explode_orders(orders: &[SnapshotOrder]) -> (Vec<OrderLine>, ExplodeStats) {
    let mut stats = ExplodeStats {
        orders: orders.len(),
        ..Default::default()
    };
    let mut lines = Vec::new();

    for order in orders {
        let Some(text) = order.products.as_deref() else {
            continue;
        };
        let Some(items) = parse_product_list(text) else {
            stats.malformed += 1;
            debug!(order_id = order.order_id, "Unparseable product list");
            continue;
        };
        for item in items.iter().filter_map(Value::as_object) {
            lines.push(OrderLine {
                order_id: order.order_id,
                order_date: order.order_date,
                customer_id: order.customer_id.clone(),
                product_id: coerce_product_id(item.get("ProductID")),
                quantity: coerce_quantity(item.get("Quantity")),
            });
        }
    }

    stats.lines = lines.len();
    (lines, stats)
}

fn snapshot_file(partition_dir: &Path, name: &str) -> PipelineResult<PathBuf> {
    let path = partition_dir.join(name);
    if !path.exists() {
        return Err(PipelineError::not_found("Raw snapshot", path));
    }
    Ok(path)
}

fn read_snapshot_orders(engine: &Engine, path: &Path) -> PipelineResult<Vec<SnapshotOrder>> {
    let mut stmt = engine.connection().prepare(&format!(
        "SELECT OrderID, strftime(OrderDate, '%Y-%m-%d %H:%M:%S.%f'), CustomerID, products
         FROM {} ORDER BY OrderID",
        parquet_scan(path)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut orders = Vec::new();
    for row in rows {
        let (order_id, raw_date, customer_id, products) = row?;
        let order_date = NaiveDateTime::parse_from_str(&raw_date, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| {
                PipelineError::EngineError(format!("OrderDate {raw_date:?} of order {order_id}: {e}"))
            })?;
        orders.push(SnapshotOrder {
            order_id,
            order_date,
            customer_id,
            products,
        });
    }
    Ok(orders)
}

fn load_lines(engine: &Engine, lines: &[OrderLine]) -> PipelineResult<()> {
    engine.execute_batch(
        "CREATE TABLE lines (
            line_no BIGINT, OrderID BIGINT, OrderDate VARCHAR, CustomerID VARCHAR,
            ProductID VARCHAR, Quantity BIGINT
        );",
    )?;
    let mut stmt = engine
        .connection()
        .prepare("INSERT INTO lines VALUES (?1, ?2, ?3, ?4, ?5, ?6)")?;
    for (i, line) in lines.iter().enumerate() {
        stmt.execute(duckdb::params![
            i as i64,
            line.order_id,
            line.order_date.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            line.customer_id.as_deref(),
            line.product_id.as_deref(),
            line.quantity,
        ])?;
    }
    Ok(())
}

/// Register the product reference table; the first row wins for duplicate ids
fn load_products(engine: &Engine, snapshot: Option<&Path>) -> PipelineResult<()> {
    match snapshot {
        Some(path) => engine.execute_batch(&format!(
            "CREATE VIEW products AS
             SELECT CAST(ProductID AS VARCHAR) AS ProductID, ProductName, Price
             FROM read_parquet({}, file_row_number = true)
             QUALIFY row_number() OVER (PARTITION BY ProductID ORDER BY file_row_number) = 1;",
            path_literal(path)
        )),
        None => engine.execute_batch(
            "CREATE TABLE products (ProductID VARCHAR, ProductName VARCHAR, Price DOUBLE);",
        ),
    }
}

const ENRICH_SQL: &str = "CREATE TABLE order_lines AS
    SELECT
        l.OrderID,
        CAST(l.OrderDate AS TIMESTAMP) AS OrderDate,
        l.CustomerID,
        l.ProductID,
        COALESCE(p.ProductName, '') AS ProductName,
        l.Quantity,
        CAST(COALESCE(p.Price, 0) AS DOUBLE) AS Price,
        CAST(l.Quantity * COALESCE(p.Price, 0) AS DOUBLE) AS Revenue
    FROM lines l
    LEFT JOIN products p ON l.ProductID = p.ProductID
    ORDER BY l.line_no;";

/// Latest product snapshot, if any product partition exists
fn latest_products(base: &Path) -> PipelineResult<Option<(NaiveDate, PathBuf)>> {
    if !base.exists() {
        return Ok(None);
    }
    match latest_partition(base) {
        Ok(partition) => {
            let path = partition.path.join(PRODUCTS_FILE);
            if path.exists() {
                Ok(Some((partition.date, path)))
            } else {
                warn!(path = %path.display(), "Product partition has no snapshot file");
                Ok(None)
            }
        }
        Err(PipelineError::NoPartitions(dir)) => {
            warn!(path = %dir.display(), "No product partitions, enrichment disabled");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run the refinement stage
pub fn run(config: &PipelineConfig) -> PipelineResult<RefineOutput> {
    let _span = info_span!("refine").entered();

    let orders_partition = latest_partition(&config.raw_orders_dir())?;
    let orders_path = snapshot_file(&orders_partition.path, ORDERS_FILE)?;
    let products = latest_products(&config.raw_products_dir())?;
    if products.is_none() {
        info!("No product snapshot available, lines get empty names and zero prices");
    }

    info!(
        orders = %orders_path.display(),
        partition = %orders_partition.date,
        "Reading raw orders and exploding order lines"
    );
    let engine = Engine::open()?;
    let orders = read_snapshot_orders(&engine, &orders_path)?;
    let (lines, stats) = explode_orders(&orders);
    if stats.malformed > 0 {
        warn!(
            malformed = stats.malformed,
            "Orders with unparseable product lists contributed no lines"
        );
    }
    info!(orders = stats.orders, lines = stats.lines, "Exploded order lines");

    load_lines(&engine, &lines)?;
    load_products(&engine, products.as_ref().map(|(_, p)| p.as_path()))?;
    engine.execute_batch(ENRICH_SQL)?;

    let out_dir = config.order_lines_dir();
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::io_with_path(&out_dir, "creating refined directory", e))?;
    let out_path = config.order_lines_path();
    engine.copy_to("SELECT * FROM order_lines", &out_path, FileFormat::Parquet)?;
    let rows = engine.row_count("order_lines")? as usize;
    engine.close()?;

    info!(path = %out_path.display(), rows, "Wrote refined order lines");
    Ok(RefineOutput {
        path: out_path,
        orders_partition: orders_partition.date,
        products_partition: products.map(|(date, _)| date),
        rows,
        stats,
    })
}
