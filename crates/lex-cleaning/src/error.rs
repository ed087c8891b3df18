//! Custom error types for the cleaning pipeline.
//!
//! This module provides a single error hierarchy using `thiserror` for the
//! quantile core and the stage sequencer.
//!
//! Errors are serializable so they can be emitted as JSON by the CLI
//! (`--json`) or forwarded to any other frontend.

use crate::pipeline::PipelineStage;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the cleaning pipeline.
#[derive(Error, Debug)]
pub enum CleaningError {
    /// A non-numeric value (NaN) was offered to a quantile sketch.
    #[error("Invalid value for quantile sketch: {0}")]
    InvalidValue(f64),

    /// A quantile rank outside `[0, 1]` was requested.
    #[error("Invalid rank {0} (must be between 0.0 and 1.0)")]
    InvalidRank(f64),

    /// A quantile was requested from a sketch that never received a value.
    #[error("Quantile requested from an empty sketch")]
    EmptySketch,

    /// A partition's schema does not carry the expected column/type.
    #[error("Schema mismatch for column '{column}' in partition {partition}: {reason}")]
    SchemaMismatch {
        column: String,
        partition: usize,
        reason: String,
    },

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline stage failed; the whole run is aborted.
    #[error("Stage '{}' failed: {source}", .stage.display_name())]
    StageFailed {
        stage: PipelineStage,
        #[source]
        source: Box<CleaningError>,
    },

    /// Pipeline was cancelled by user.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Internal error (e.g., a worker panicked).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CleaningError>,
    },
}

impl CleaningError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CleaningError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wrap an error as the failure of `stage`.
    ///
    /// Cancellation passes through untouched so callers can still match on it.
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            Self::Cancelled | Self::StageFailed { .. } => self,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(
        column: impl Into<String>,
        partition: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            column: column.into(),
            partition,
            reason: reason.into(),
        }
    }

    /// Get error code for machine-readable output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidValue(_) => "INVALID_VALUE",
            Self::InvalidRank(_) => "INVALID_RANK",
            Self::EmptySketch => "EMPTY_SKETCH",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::StageFailed { .. } => "STAGE_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// The innermost error, looking through stage and context wrappers.
    pub fn root_cause(&self) -> &CleaningError {
        match self {
            Self::StageFailed { source, .. } | Self::WithContext { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// The stage that failed, if this error aborted a pipeline run.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            Self::WithContext { source, .. } => source.failed_stage(),
            _ => None,
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for CleaningError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("CleaningError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for cleaning operations.
pub type Result<T> = std::result::Result<T, CleaningError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CleaningError::Polars(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(CleaningError::EmptySketch.error_code(), "EMPTY_SKETCH");
        assert_eq!(
            CleaningError::ColumnNotFound("price".to_string()).error_code(),
            "COLUMN_NOT_FOUND"
        );
        assert_eq!(
            CleaningError::schema_mismatch("price", 2, "not numeric").error_code(),
            "SCHEMA_MISMATCH"
        );
    }

    #[test]
    fn test_in_stage_wraps_cause() {
        let error = CleaningError::EmptySketch.in_stage(PipelineStage::OutlierCapping);
        assert_eq!(error.error_code(), "STAGE_FAILED");
        assert_eq!(error.failed_stage(), Some(PipelineStage::OutlierCapping));
        assert!(matches!(error.root_cause(), CleaningError::EmptySketch));
        assert!(error.to_string().contains("Capping Outliers"));
    }

    #[test]
    fn test_in_stage_keeps_cancellation() {
        let error = CleaningError::Cancelled.in_stage(PipelineStage::Deduplication);
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_in_stage_does_not_double_wrap() {
        let error = CleaningError::EmptySketch
            .in_stage(PipelineStage::OutlierCapping)
            .in_stage(PipelineStage::TypeCoercion);
        assert_eq!(error.failed_stage(), Some(PipelineStage::OutlierCapping));
    }

    #[test]
    fn test_error_serialization() {
        let error = CleaningError::ColumnNotFound("Age".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("COLUMN_NOT_FOUND"));
        assert!(json.contains("Age"));
    }

    #[test]
    fn test_with_context() {
        let error = CleaningError::InvalidRank(1.5).with_context("While estimating bounds");
        assert!(error.to_string().contains("While estimating bounds"));
        assert_eq!(error.error_code(), "INVALID_RANK"); // Preserves original code
    }
}
