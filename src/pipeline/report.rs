//! Per-stage outputs and the final run report

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use super::stage::PipelineStage;

/// Pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Output from a pipeline stage
#[derive(Debug, Clone, Serialize)]
pub struct StageOutput {
    /// Whether the stage was skipped
    pub skipped: bool,
    /// Reason for skipping (if applicable)
    pub skip_reason: Option<String>,
    /// Files written by the stage
    pub files: Vec<PathBuf>,
    /// Row counts reported by the stage
    pub counts: BTreeMap<&'static str, usize>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl StageOutput {
    /// Create a successful stage output
    pub fn success() -> Self {
        Self {
            skipped: false,
            skip_reason: None,
            files: Vec::new(),
            counts: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    /// Create a skipped stage output
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::success()
        }
    }

    /// Add an output file
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add multiple output files
    pub fn with_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.files.extend(paths);
        self
    }

    /// Record a count
    pub fn with_count(mut self, key: &'static str, value: usize) -> Self {
        self.counts.insert(key, value);
        self
    }

    /// Set duration
    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Report from a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Run ID
    pub run_id: String,
    /// Final status
    pub status: PipelineStatus,
    /// Stages that ran to completion, skipped ones excluded
    pub stages_completed: Vec<PipelineStage>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Stage outputs keyed by stage name
    pub outputs: BTreeMap<String, StageOutput>,
}

impl PipelineReport {
    /// Check if pipeline was successful
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Output of `stage`, if it ran or was skipped
    pub fn output(&self, stage: PipelineStage) -> Option<&StageOutput> {
        self.outputs.get(stage.name())
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else if secs > 0 {
            format!("{}s", secs)
        } else {
            format!("{}ms", self.duration_ms)
        }
    }

    /// Log a one-line summary per stage
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            status = %self.status,
            duration = %self.duration_formatted(),
            stages_completed = self.stages_completed.len(),
            "Pipeline summary"
        );

        for stage in PipelineStage::all() {
            if let Some(output) = self.output(stage) {
                let status = if output.skipped { "skipped" } else { "ok" };
                info!(
                    stage = stage.name(),
                    status,
                    files = output.files.len(),
                    counts = ?output.counts,
                    duration_ms = output.duration_ms,
                    reason = output.skip_reason.as_deref().unwrap_or(""),
                    "Stage summary"
                );
            }
        }
    }
}
