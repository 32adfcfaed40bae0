//! Integration tests for the full sales pipeline
//!
//! Tests the complete workflow: raw copy → refinement → aggregation → publication

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use sales_pipeline::engine::{Engine, parquet_scan};
use sales_pipeline::{
    AggregateTable, PipelineConfig, PipelineError, PipelineStage, aggregate, raw, refine,
    run_pipeline,
};

const ORDERS_CSV: &str = "OrderDate,CustomerID,products\n\
    2024-01-05,C1,\"[{'ProductID':1,'Quantity':2}]\"\n";

const PRODUCTS_CSV: &str = "ProductID,ProductName,Price\n1,Widget,10.0\n";

/// Helper to lay out a project root with the given sources
fn project(orders: &str, products: Option<&str>) -> (TempDir, PipelineConfig) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let data = temp.path().join("data");
    std::fs::create_dir_all(&data).expect("Failed to create data dir");
    std::fs::write(data.join("orders.csv"), orders).expect("Failed to write orders");
    if let Some(products) = products {
        std::fs::write(data.join("products.csv"), products).expect("Failed to write products");
    }
    let config = PipelineConfig::from_root(temp.path()).with_log_dir(None);
    (temp, config)
}

fn query_one<T: duckdb::types::FromSql>(sql: &str) -> T {
    let engine = Engine::open().expect("Failed to open engine");
    let value = engine
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .expect("Query failed");
    engine.close().expect("Failed to close engine");
    value
}

fn read_all(dir: &Path, names: &[String]) -> Vec<Vec<u8>> {
    names
        .iter()
        .map(|name| std::fs::read(dir.join(name)).expect("Failed to read output"))
        .collect()
}

fn sqlite_rows(db: &Path, table: &str) -> Vec<String> {
    let conn = rusqlite::Connection::open(db).expect("Failed to open sqlite");
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {table}"))
        .expect("Failed to prepare");
    let columns = stmt.column_count();
    stmt.query_map([], |row| {
        let mut fields = Vec::with_capacity(columns);
        for i in 0..columns {
            let value: rusqlite::types::Value = row.get(i)?;
            fields.push(format!("{value:?}"));
        }
        Ok(fields.join("|"))
    })
    .expect("Failed to query")
    .map(|r| r.expect("Bad row"))
    .collect()
}

#[test]
fn test_single_order_end_to_end() {
    let (_temp, config) = project(ORDERS_CSV, Some(PRODUCTS_CSV));

    let report = run_pipeline(config.clone()).expect("Pipeline failed");
    assert!(report.is_success());
    assert_eq!(report.stages_completed, PipelineStage::all());

    let fact = parquet_scan(&config.order_lines_path());
    assert_eq!(query_one::<i64>(&format!("SELECT COUNT(*) FROM {fact}")), 1);
    assert_eq!(query_one::<f64>(&format!("SELECT Revenue FROM {fact}")), 20.0);
    assert_eq!(
        query_one::<String>(&format!("SELECT ProductName FROM {fact}")),
        "Widget"
    );

    let by_day = parquet_scan(&AggregateTable::SalesByDay.path_in(&config.aggregated_dir));
    assert_eq!(
        query_one::<f64>(&format!(
            "SELECT revenue FROM {by_day} WHERE date = DATE '2024-01-05'"
        )),
        20.0
    );
    assert_eq!(
        query_one::<i64>(&format!(
            "SELECT quantity FROM {by_day} WHERE date = DATE '2024-01-05'"
        )),
        2
    );

    for table in AggregateTable::all() {
        assert!(
            config
                .output_dir
                .join("parquet")
                .join(format!("{}.parquet", table.name()))
                .exists()
        );
        assert!(
            config
                .output_dir
                .join("csv")
                .join(format!("{}.csv", table.name()))
                .exists()
        );
    }

    let csv = std::fs::read_to_string(config.output_dir.join("csv/sales_by_day.csv"))
        .expect("Failed to read csv");
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("date,revenue,quantity"));
    let fields: Vec<&str> = lines.next().expect("Missing data row").split(',').collect();
    assert_eq!(fields[0], "2024-01-05");
    assert_eq!(fields[1].parse::<f64>().unwrap(), 20.0);
    assert_eq!(fields[2], "2");
    assert_eq!(lines.next(), None);

    let conn = rusqlite::Connection::open(config.output_dir.join("sales.db"))
        .expect("Failed to open sqlite");
    let (date, revenue, quantity): (String, f64, i64) = conn
        .query_row(
            "SELECT date, revenue, quantity FROM sales_by_day",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("Missing sales_by_day row");
    assert_eq!(date, "2024-01-05");
    assert_eq!(revenue, 20.0);
    assert_eq!(quantity, 2);
}

#[test]
fn test_text_product_ids_end_to_end() {
    let (_temp, config) = project(
        "OrderDate,CustomerID,ShipCountry,products\n\
         2024-01-05,C1,NL,\"[{'ProductID':'P1','Quantity':2}]\"\n",
        Some("ProductID,ProductName,Price\nP1,Widget,10.0\n"),
    );

    run_pipeline(config.clone()).expect("Pipeline failed");

    let fact = parquet_scan(&config.order_lines_path());
    assert_eq!(query_one::<String>(&format!("SELECT ProductID FROM {fact}")), "P1");
    assert_eq!(query_one::<f64>(&format!("SELECT Revenue FROM {fact}")), 20.0);

    let partition = std::fs::read_dir(config.raw_orders_dir())
        .expect("Missing raw orders")
        .next()
        .expect("No raw partition")
        .expect("Bad dir entry")
        .path();
    let raw_orders = parquet_scan(&partition.join(raw::ORDERS_FILE));
    assert_eq!(
        query_one::<String>(&format!("SELECT ShipCountry FROM {raw_orders}")),
        "NL"
    );

    let conn = rusqlite::Connection::open(config.output_dir.join("sales.db"))
        .expect("Failed to open sqlite");
    let (product, revenue): (String, f64) = conn
        .query_row(
            "SELECT ProductID, revenue FROM sales_by_product",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("Missing sales_by_product row");
    assert_eq!(product, "P1");
    assert_eq!(revenue, 20.0);
}

#[test]
fn test_missing_products_degrades_enrichment() {
    let (_temp, config) = project(ORDERS_CSV, None);
    let at = Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap();

    raw::ingest_orders(&config.orders_csv, &config.raw_orders_dir(), at)
        .expect("Failed to ingest orders");
    let products = raw::ingest_products(&config.products_csv, &config.raw_products_dir(), at)
        .expect("Missing products must not fail");
    assert!(products.is_none());

    let refined = refine::run(&config).expect("Refinement failed");
    assert_eq!(refined.rows, 1);

    let fact = parquet_scan(&refined.path);
    let (name, price, revenue): (String, f64, f64) = {
        let engine = Engine::open().expect("Failed to open engine");
        let row = engine
            .connection()
            .query_row(
                &format!("SELECT ProductName, Price, Revenue FROM {fact}"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("Missing fact row");
        engine.close().expect("Failed to close engine");
        row
    };
    assert_eq!(name, "");
    assert_eq!(price, 0.0);
    assert_eq!(revenue, 0.0);
}

#[test]
fn test_full_run_requires_both_sources() {
    let (_temp, config) = project(ORDERS_CSV, None);

    let err = run_pipeline(config.clone()).expect_err("Run should fail");
    assert!(matches!(err, PipelineError::NotFound { .. }));
    assert!(!config.raw_dir.exists());
    assert!(!config.output_dir.exists());
}

#[test]
fn test_aggregation_without_fact_table() {
    let (_temp, config) = project(ORDERS_CSV, Some(PRODUCTS_CSV));

    let err = aggregate::run(&config.order_lines_path(), &config.aggregated_dir)
        .expect_err("Aggregation should fail");
    assert!(err.is_not_found());
    assert!(!config.aggregated_dir.exists());
}

#[test]
fn test_invalid_date_aborts_run() {
    let (_temp, config) = project(
        "OrderDate,CustomerID,products\n2024-01-05,C1,[]\n31/31/2024,C2,[]\n",
        Some(PRODUCTS_CSV),
    );

    let err = run_pipeline(config.clone()).expect_err("Run should fail");
    assert!(err.is_invalid_data());
    assert!(!config.raw_orders_dir().exists());
    assert!(!config.order_lines_path().exists());
    assert!(!config.aggregated_dir.exists());
}

#[test]
fn test_rerun_is_idempotent() {
    let (_temp, config) = project(
        "OrderDate,CustomerID,products\n\
         2024-01-05,C1,\"[{'ProductID':1,'Quantity':2},{'ProductID':2,'Quantity':3}]\"\n\
         2024-02-11,C2,\"[{'ProductID':2,'Quantity':1}]\"\n\
         2025-03-01,C1,not a list\n\
         2025-03-02,C3,\"[{'ProductID':7,'Quantity':'4'}]\"\n",
        Some("ProductID,ProductName,Price\n1,Widget,10.0\n2,Gadget,2.25\n"),
    );

    let names: Vec<String> = AggregateTable::all()
        .iter()
        .map(|t| t.file_name())
        .collect();
    let csv_names: Vec<String> = AggregateTable::all()
        .iter()
        .map(|t| format!("{}.csv", t.name()))
        .collect();
    let db: PathBuf = config.output_dir.join("sales.db");

    run_pipeline(config.clone()).expect("First run failed");
    let fact = std::fs::read(config.order_lines_path()).expect("Missing fact table");
    let aggregated = read_all(&config.aggregated_dir, &names);
    let published = read_all(&config.output_dir.join("parquet"), &names);
    let csv = read_all(&config.output_dir.join("csv"), &csv_names);
    let database = std::fs::read(&db).expect("Missing sales.db");
    let tables: Vec<Vec<String>> = AggregateTable::all()
        .iter()
        .map(|t| sqlite_rows(&db, t.name()))
        .collect();

    run_pipeline(config.clone()).expect("Second run failed");
    assert_eq!(std::fs::read(config.order_lines_path()).unwrap(), fact);
    assert_eq!(read_all(&config.aggregated_dir, &names), aggregated);
    assert_eq!(read_all(&config.output_dir.join("parquet"), &names), published);
    assert_eq!(read_all(&config.output_dir.join("csv"), &csv_names), csv);
    assert_eq!(std::fs::read(&db).unwrap(), database);
    let tables_again: Vec<Vec<String>> = AggregateTable::all()
        .iter()
        .map(|t| sqlite_rows(&db, t.name()))
        .collect();
    assert_eq!(tables_again, tables);

    // Replaced, not appended
    assert_eq!(sqlite_rows(&db, "sales_per_order").len(), 3);
}
