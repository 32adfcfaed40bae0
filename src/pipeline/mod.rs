//! Orchestration of the four pipeline stages
//!
//! A run executes, strictly in order:
//! 1. **Raw copy**: snapshot orders and products into date partitions
//! 2. **Refine**: explode orders into lines and enrich them with products
//! 3. **Aggregate**: compute the five sales summaries
//! 4. **Publish** (optional): copy summaries to Parquet, CSV and SQLite
//!
//! # Example
//!
//! ```rust,ignore
//! use sales_pipeline::config::PipelineConfig;
//! use sales_pipeline::pipeline::PipelineExecutor;
//!
//! let config = PipelineConfig::from_root("/srv/sales").with_publish(false);
//!
//! let mut executor = PipelineExecutor::new(config)?;
//! let report = executor.run()?;
//!
//! println!("Pipeline completed in {}", report.duration_formatted());
//! ```

mod executor;
mod report;
mod stage;

pub use executor::PipelineExecutor;
pub use report::{PipelineReport, PipelineStatus, StageOutput};
pub use stage::PipelineStage;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;

/// Run a pipeline with the given configuration
///
/// This is a convenience function for simple pipeline execution.
pub fn run_pipeline(config: PipelineConfig) -> PipelineResult<PipelineReport> {
    let mut executor = PipelineExecutor::new(config)?;
    executor.run()
}
