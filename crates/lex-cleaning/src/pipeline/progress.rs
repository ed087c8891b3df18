//! Progress reporting and cancellation support for the cleaning pipeline.
//!
//! The sequencer reports one update when a stage starts and one when it
//! finishes, and checks the [`CancellationToken`] between stages.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_cleaning::{CancellationToken, Pipeline};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! // In another thread
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     token_clone.cancel();
//! });
//!
//! let result = Pipeline::builder()
//!     .cancellation_token(token)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?
//!     .process(dataset);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of the cleaning pipeline, in their default execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Pipeline is initializing and measuring the input
    Initializing,
    /// Removing duplicate rows across all partitions
    Deduplication,
    /// Dropping rows with required nulls and filling defaults
    MissingValues,
    /// Stripping and normalizing free-text columns
    TextNormalization,
    /// Lower-casing, trimming and aliasing categorical columns
    CategoricalNormalization,
    /// Estimating quantile bounds and clamping numeric columns
    OutlierCapping,
    /// Casting columns to their declared types
    TypeCoercion,
    /// Renaming and dropping columns
    SchemaPruning,
    /// Redistributing rows into the target partition count
    Repartitioning,
    /// Writing partitions to the output directory
    Writing,
    /// Pipeline completed successfully
    Complete,
    /// Pipeline was cancelled by user
    Cancelled,
    /// Pipeline failed with an error
    Failed,
}

impl PipelineStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Deduplication => "Removing Duplicates",
            Self::MissingValues => "Handling Missing Values",
            Self::TextNormalization => "Normalizing Text",
            Self::CategoricalNormalization => "Normalizing Categories",
            Self::OutlierCapping => "Capping Outliers",
            Self::TypeCoercion => "Coercing Types",
            Self::SchemaPruning => "Pruning Schema",
            Self::Repartitioning => "Repartitioning",
            Self::Writing => "Writing Output",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Returns the typical weight of this stage in the overall pipeline (0.0 - 1.0).
    ///
    /// These weights are used to estimate overall progress. They sum to ~1.0
    /// for the main processing stages (excluding terminal states).
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.02,
            Self::Deduplication => 0.12,
            Self::MissingValues => 0.10,
            Self::TextNormalization => 0.08,
            Self::CategoricalNormalization => 0.06,
            Self::OutlierCapping => 0.25,
            Self::TypeCoercion => 0.10,
            Self::SchemaPruning => 0.03,
            Self::Repartitioning => 0.09,
            Self::Writing => 0.15,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Returns the cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::Deduplication => 0.02,
            Self::MissingValues => 0.14,
            Self::TextNormalization => 0.24,
            Self::CategoricalNormalization => 0.32,
            Self::OutlierCapping => 0.38,
            Self::TypeCoercion => 0.63,
            Self::SchemaPruning => 0.73,
            Self::Repartitioning => 0.76,
            Self::Writing => 0.85,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// Progress update emitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current pipeline stage
    pub stage: PipelineStage,

    /// Optional sub-stage description (e.g., "Column: price")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    /// Number of items processed in current stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    /// Total items in current stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    /// Creates a new progress update for a stage without sub-stage info.
    pub fn new(stage: PipelineStage, stage_progress: f32, message: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: None,
            progress: overall_progress(stage, stage_progress),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a new progress update with item counts.
    pub fn with_items(
        stage: PipelineStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        Self {
            stage,
            sub_stage: Some(sub_stage.into()),
            progress: overall_progress(stage, stage_progress),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: Some(current),
            items_total: Some(total),
        }
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self::terminal(PipelineStage::Complete, 1.0, message)
    }

    /// Creates a cancelled progress update.
    pub fn cancelled() -> Self {
        Self::terminal(PipelineStage::Cancelled, 0.0, "Pipeline cancelled by user")
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::terminal(PipelineStage::Failed, 0.0, message)
    }

    fn terminal(stage: PipelineStage, progress: f32, message: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: None,
            progress,
            stage_progress: progress,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }
}

fn overall_progress(stage: PipelineStage, stage_progress: f32) -> f32 {
    (stage.base_progress() + stage.weight() * stage_progress.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be `Send + Sync`; stages run on rayon workers and the
/// pipeline itself may run on a background thread.
pub trait ProgressReporter: Send + Sync {
    /// Called when progress is made. Implementations should not block.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    /// Creates a new closure-based progress reporter.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running pipeline.
///
/// Clones share one flag. The pipeline checks it before every stage and
/// returns [`CleaningError::Cancelled`](crate::error::CleaningError::Cancelled)
/// once it is set; nothing is written for a cancelled run.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    /// Creates a new cancellation token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation of the pipeline. Safe to call from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested on this token or a clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
