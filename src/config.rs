//! Pipeline configuration
//!
//! The directory layout is an explicit value handed to every stage, so each
//! stage can run against an arbitrary tree (tests use temporary directories).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Name of the optional configuration file looked up in the project root
pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Orders source (delimited text)
    pub orders_csv: PathBuf,
    /// Products source (delimited text, optional at ingestion)
    pub products_csv: PathBuf,
    /// Raw layer root, holds `orders/` and `products/` partitions
    pub raw_dir: PathBuf,
    /// Refined layer root, holds the fact table
    pub refined_dir: PathBuf,
    /// Aggregated layer root, one file per aggregate
    pub aggregated_dir: PathBuf,
    /// Publication root for dashboard sinks
    pub output_dir: PathBuf,
    /// Directory for the pipeline log file (stdout only when unset)
    pub log_dir: Option<PathBuf>,
    /// Whether to run the publication stage
    pub publish: bool,
}

/// Partial configuration as read from `pipeline.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    orders_csv: Option<PathBuf>,
    products_csv: Option<PathBuf>,
    raw_dir: Option<PathBuf>,
    refined_dir: Option<PathBuf>,
    aggregated_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    publish: Option<bool>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_root(".")
    }
}

impl PipelineConfig {
    /// Default layout rooted at `root`
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let datalake = root.join("datalake");
        Self {
            orders_csv: root.join("data").join("orders.csv"),
            products_csv: root.join("data").join("products.csv"),
            raw_dir: datalake.join("raw"),
            refined_dir: datalake.join("refined"),
            aggregated_dir: datalake.join("aggregated"),
            output_dir: root.join("output"),
            log_dir: Some(root.join("logs")),
            publish: true,
        }
    }

    /// Load the layout for `root`, applying `pipeline.toml` overrides if present
    pub fn load(root: impl AsRef<Path>) -> PipelineResult<Self> {
        let root = root.as_ref();
        let mut config = Self::from_root(root);
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(config);
        }

        debug!(path = %path.display(), "Loading configuration file");
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::io_with_path(&path, "reading configuration", e))?;
        let file: ConfigFile = toml::from_str(&contents)
            .map_err(|e| PipelineError::ConfigError(format!("{}: {e}", path.display())))?;
        config.apply(file);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(path) = file.orders_csv {
            self.orders_csv = path;
        }
        if let Some(path) = file.products_csv {
            self.products_csv = path;
        }
        if let Some(path) = file.raw_dir {
            self.raw_dir = path;
        }
        if let Some(path) = file.refined_dir {
            self.refined_dir = path;
        }
        if let Some(path) = file.aggregated_dir {
            self.aggregated_dir = path;
        }
        if let Some(path) = file.output_dir {
            self.output_dir = path;
        }
        if file.log_dir.is_some() {
            self.log_dir = file.log_dir;
        }
        if let Some(publish) = file.publish {
            self.publish = publish;
        }
    }

    /// Set the orders source
    pub fn with_orders_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.orders_csv = path.into();
        self
    }

    /// Set the products source
    pub fn with_products_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.products_csv = path.into();
        self
    }

    /// Set the raw layer root
    pub fn with_raw_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw_dir = path.into();
        self
    }

    /// Set the refined layer root
    pub fn with_refined_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.refined_dir = path.into();
        self
    }

    /// Set the aggregated layer root
    pub fn with_aggregated_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.aggregated_dir = path.into();
        self
    }

    /// Set the publication root
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Set or clear the log directory
    pub fn with_log_dir(mut self, path: Option<PathBuf>) -> Self {
        self.log_dir = path;
        self
    }

    /// Enable or disable publication
    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    /// Partition base for raw orders snapshots
    pub fn raw_orders_dir(&self) -> PathBuf {
        self.raw_dir.join("orders")
    }

    /// Partition base for raw products snapshots
    pub fn raw_products_dir(&self) -> PathBuf {
        self.raw_dir.join("products")
    }

    /// Directory holding the fact table
    pub fn order_lines_dir(&self) -> PathBuf {
        self.refined_dir.join("order_lines")
    }

    /// Location of the fact table
    pub fn order_lines_path(&self) -> PathBuf {
        self.order_lines_dir().join("order_lines.parquet")
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        let layers = [
            ("raw_dir", &self.raw_dir),
            ("refined_dir", &self.refined_dir),
            ("aggregated_dir", &self.aggregated_dir),
            ("output_dir", &self.output_dir),
        ];
        for (i, (name, path)) in layers.iter().enumerate() {
            for (other, other_path) in &layers[i + 1..] {
                if path == other_path {
                    return Err(PipelineError::ConfigError(format!(
                        "{name} and {other} must differ (both {})",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
