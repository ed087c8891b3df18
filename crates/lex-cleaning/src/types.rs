//! Result and summary types produced by a pipeline run.

use crate::dataset::Dataset;
use crate::pipeline::PipelineStage;
use crate::quantile::Bounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Shape of a dataset at one point of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetShape {
    pub rows: usize,
    pub columns: usize,
    pub partitions: usize,
}

impl DatasetShape {
    pub fn of(dataset: &Dataset) -> Self {
        Self {
            rows: dataset.height(),
            columns: dataset.width(),
            partitions: dataset.num_partitions(),
        }
    }
}

/// What one stage did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub duration_ms: u64,
    pub before: DatasetShape,
    pub after: DatasetShape,
    /// Human-readable actions, in the order they were applied.
    pub actions: Vec<String>,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningSummary {
    /// Total execution time in milliseconds.
    pub duration_ms: u64,

    /// Number of rows before cleaning.
    pub rows_before: usize,
    /// Number of rows after cleaning.
    pub rows_after: usize,
    /// Number of rows removed during cleaning.
    pub rows_removed: usize,

    /// Number of columns before cleaning.
    pub columns_before: usize,
    /// Number of columns after cleaning.
    pub columns_after: usize,

    pub partitions_before: usize,
    pub partitions_after: usize,

    /// Share of non-null cells before cleaning (0.0 - 1.0).
    pub data_quality_score_before: f32,
    /// Share of non-null cells after cleaning (0.0 - 1.0).
    pub data_quality_score_after: f32,

    /// Per-stage reports, in execution order.
    pub stages: Vec<StageReport>,

    /// Warnings and notes generated during the run.
    pub warnings: Vec<String>,
}

impl CleaningSummary {
    /// Create a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    /// Add a warning to the summary.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Calculate the percentage of rows removed.
    pub fn rows_removed_percentage(&self) -> f32 {
        if self.rows_before == 0 {
            0.0
        } else {
            (self.rows_removed as f32 / self.rows_before as f32) * 100.0
        }
    }

    /// Calculate data quality improvement as a percentage.
    pub fn quality_improvement(&self) -> f32 {
        (self.data_quality_score_after - self.data_quality_score_before) * 100.0
    }

    /// Report of `stage`, if it ran.
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

/// Outcome of [`Pipeline::process`](crate::Pipeline::process).
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The cleaned, partitioned dataset.
    pub dataset: Dataset,
    /// Capping bounds used per column.
    pub bounds: BTreeMap<String, Bounds>,
    pub summary: CleaningSummary,
    /// Every action of every stage, in order.
    pub processing_steps: Vec<String>,
    /// Directory holding the written partitions, when saved to disk.
    pub output_path: Option<PathBuf>,
}

impl PipelineResult {
    /// Serializable report of this run.
    pub fn report(&self) -> CleaningReport {
        CleaningReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            output_path: self
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            summary: self.summary.clone(),
            bounds: self.bounds.clone(),
            processing_steps: self.processing_steps.clone(),
        }
    }
}

/// JSON report written next to the output and printed by `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningReport {
    pub generated_at: String,
    pub output_path: Option<String>,
    pub summary: CleaningSummary,
    pub bounds: BTreeMap<String, Bounds>,
    pub processing_steps: Vec<String>,
}
