//! Sales Pipeline - batch medallion ETL for sales data
//!
//! Turns two delimited source files (orders and products) into
//! dashboard-ready aggregates in four forward-only stages:
//! - Raw copy into ingestion-date partitions
//! - Refinement into one enriched order-line fact table
//! - Aggregation into five fixed sales summaries
//! - Publication to Parquet, CSV and SQLite sinks
//!
//! Stages exchange data only through the directory layout described by
//! [`config::PipelineConfig`].

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod publish;
pub mod raw;
pub mod refine;

// Re-export commonly used types
pub use aggregate::AggregateTable;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::init_logging;
pub use pipeline::{
    PipelineExecutor, PipelineReport, PipelineStage, PipelineStatus, StageOutput, run_pipeline,
};
pub use publish::{PublishSummary, Sink};
