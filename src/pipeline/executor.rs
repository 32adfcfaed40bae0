//! Pipeline executor for running the four stages in order

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use super::report::{PipelineReport, PipelineStatus, StageOutput};
use super::stage::PipelineStage;
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::{aggregate, publish, raw, refine};

/// Pipeline executor that runs all stages
pub struct PipelineExecutor {
    config: PipelineConfig,
    run_id: String,
    status: PipelineStatus,
    completed_stages: Vec<PipelineStage>,
    outputs: BTreeMap<String, StageOutput>,
}

impl PipelineExecutor {
    /// Create a new pipeline executor
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            run_id: Uuid::new_v4().to_string(),
            status: PipelineStatus::Running,
            completed_stages: Vec::new(),
            outputs: BTreeMap::new(),
        })
    }

    /// Identifier of this run, attached to every log line
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline
    ///
    /// The first failing stage aborts the run and its error is returned
    /// unchanged. Later stages are not attempted.
    pub fn run(&mut self) -> PipelineResult<PipelineReport> {
        let _span = info_span!("pipeline_run", run_id = %self.run_id).entered();

        let start = Instant::now();
        let stages = PipelineStage::all();

        info!(
            run_id = %self.run_id,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Starting pipeline"
        );

        for stage in &stages {
            if let Some(reason) = self.should_skip_stage(*stage) {
                info!(stage = stage.name(), reason = %reason, "Skipping stage");
                self.outputs
                    .insert(stage.name().to_string(), StageOutput::skipped(reason));
                continue;
            }

            let _stage_span = info_span!("pipeline_stage", stage = stage.name()).entered();
            info!(
                stage = stage.name(),
                index = stage.index(),
                description = stage.description(),
                "Starting stage"
            );

            match self.run_stage(*stage) {
                Ok(output) => {
                    info!(
                        stage = stage.name(),
                        duration_ms = output.duration_ms,
                        files = output.files.len(),
                        "Stage completed"
                    );
                    self.completed_stages.push(*stage);
                    self.outputs.insert(stage.name().to_string(), output);
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "Stage failed");
                    self.status = PipelineStatus::Failed;
                    return Err(e);
                }
            }
        }

        self.status = PipelineStatus::Completed;
        let duration = start.elapsed();
        info!(
            run_id = %self.run_id,
            duration_ms = duration.as_millis() as u64,
            stages_completed = self.completed_stages.len(),
            "Pipeline completed"
        );

        Ok(PipelineReport {
            run_id: self.run_id.clone(),
            status: self.status,
            stages_completed: self.completed_stages.clone(),
            duration_ms: duration.as_millis() as u64,
            outputs: self.outputs.clone(),
        })
    }

    /// Run a single stage
    fn run_stage(&self, stage: PipelineStage) -> PipelineResult<StageOutput> {
        let start = Instant::now();

        let output = match stage {
            PipelineStage::RawCopy => self.run_raw_copy()?,
            PipelineStage::Refine => self.run_refine()?,
            PipelineStage::Aggregate => self.run_aggregate()?,
            PipelineStage::Publish => self.run_publish()?,
        };

        Ok(output.with_duration(start.elapsed().as_millis() as u64))
    }

    fn run_raw_copy(&self) -> PipelineResult<StageOutput> {
        let snapshot = raw::run(&self.config, Utc::now())?;

        debug!(ingestion_date = %snapshot.ingestion_date, "Raw snapshot written");
        Ok(StageOutput::success()
            .with_file(&snapshot.orders.path)
            .with_file(&snapshot.products.path)
            .with_count("orders", snapshot.orders.rows)
            .with_count("products", snapshot.products.rows))
    }

    fn run_refine(&self) -> PipelineResult<StageOutput> {
        let refined = refine::run(&self.config)?;

        debug!(
            orders_partition = %refined.orders_partition,
            products_partition = ?refined.products_partition,
            "Refined from partitions"
        );
        Ok(StageOutput::success()
            .with_file(&refined.path)
            .with_count("rows", refined.rows)
            .with_count("orders", refined.stats.orders)
            .with_count("malformed_product_lists", refined.stats.malformed))
    }

    fn run_aggregate(&self) -> PipelineResult<StageOutput> {
        let tables = aggregate::run(&self.config.order_lines_path(), &self.config.aggregated_dir)?;

        Ok(StageOutput::success().with_files(tables.into_values()))
    }

    fn run_publish(&self) -> PipelineResult<StageOutput> {
        let summary = publish::run(&self.config.aggregated_dir, &self.config.output_dir)?;

        Ok(StageOutput::success()
            .with_count("published", summary.published.len())
            .with_count("skipped", summary.skipped.len())
            .with_files(summary.files))
    }

    /// Check if a stage should be skipped
    fn should_skip_stage(&self, stage: PipelineStage) -> Option<String> {
        match stage {
            PipelineStage::Publish if !self.config.publish => {
                Some("Publication disabled in configuration".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_in(root: &Path) -> PipelineConfig {
        let data = root.join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(
            data.join("orders.csv"),
            "OrderDate,CustomerID,products\n\
             2024-01-05,C1,\"[{'ProductID':1,'Quantity':2}]\"\n\
             2024-01-06,C2,\"[{'ProductID':2,'Quantity':1},{'ProductID':1,'Quantity':1}]\"\n",
        )
        .unwrap();
        std::fs::write(
            data.join("products.csv"),
            "ProductID,ProductName,Price\n1,Widget,10.0\n2,Gadget,4.5\n",
        )
        .unwrap();
        PipelineConfig::from_root(root).with_log_dir(None)
    }

    #[test]
    fn test_pipeline_executor_creation() {
        let temp = TempDir::new().unwrap();
        let executor = PipelineExecutor::new(config_in(temp.path())).unwrap();
        assert_eq!(executor.run_id().len(), 36);
        assert!(executor.config().publish);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path()).with_refined_dir(temp.path().join("datalake/raw"));
        let err = PipelineExecutor::new(config).err().unwrap();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_full_run() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        let mut executor = PipelineExecutor::new(config.clone()).unwrap();

        let report = executor.run().unwrap();
        assert!(report.is_success());
        assert_eq!(report.stages_completed, PipelineStage::all());

        let refined = report.output(PipelineStage::Refine).unwrap();
        assert_eq!(refined.counts["rows"], 3);
        assert_eq!(refined.counts["malformed_product_lists"], 0);
        assert_eq!(refined.files, vec![config.order_lines_path()]);

        let aggregated = report.output(PipelineStage::Aggregate).unwrap();
        assert_eq!(aggregated.files.len(), 5);

        let published = report.output(PipelineStage::Publish).unwrap();
        assert!(!published.skipped);
        assert!(config.output_dir.join("csv/sales_by_day.csv").exists());
        assert!(config.output_dir.join("sales.db").exists());
    }

    #[test]
    fn test_publish_disabled_is_skipped() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path()).with_publish(false);
        let mut executor = PipelineExecutor::new(config.clone()).unwrap();

        let report = executor.run().unwrap();
        assert!(report.is_success());
        assert_eq!(report.stages_completed.len(), 3);
        let publish = report.output(PipelineStage::Publish).unwrap();
        assert!(publish.skipped);
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn test_missing_orders_aborts_before_writing() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::remove_file(&config.orders_csv).unwrap();
        let mut executor = PipelineExecutor::new(config.clone()).unwrap();

        let err = executor.run().unwrap_err();
        assert!(err.is_not_found());
        assert!(!config.raw_dir.exists());
        assert!(!config.refined_dir.exists());
        assert!(!config.aggregated_dir.exists());
    }
}
