use serde::Serialize;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Stage 1: Snapshot the source files into the raw layer
    RawCopy,
    /// Stage 2: Explode and enrich order lines
    Refine,
    /// Stage 3: Compute the summary tables
    Aggregate,
    /// Stage 4: Copy summaries into the output sinks (optional)
    Publish,
}

impl PipelineStage {
    /// Get all stages in execution order
    pub fn all() -> Vec<Self> {
        vec![Self::RawCopy, Self::Refine, Self::Aggregate, Self::Publish]
    }

    /// Get stage name
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawCopy => "raw_copy",
            Self::Refine => "refine",
            Self::Aggregate => "aggregate",
            Self::Publish => "publish",
        }
    }

    /// Get stage description
    pub fn description(&self) -> &'static str {
        match self {
            Self::RawCopy => "Snapshot orders and products into the raw layer",
            Self::Refine => "Explode orders into enriched order lines",
            Self::Aggregate => "Compute sales aggregates",
            Self::Publish => "Publish aggregates to Parquet, CSV and SQLite",
        }
    }

    /// Get stage index (1-based)
    pub fn index(&self) -> usize {
        match self {
            Self::RawCopy => 1,
            Self::Refine => 2,
            Self::Aggregate => 3,
            Self::Publish => 4,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
