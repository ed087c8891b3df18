//! Pipeline module.
//!
//! This module provides the stage sequencer and the stages that are not
//! plain row-local cleaning: outlier capping and repartitioning.

mod builder;
pub mod outliers;
pub mod partitioning;
pub mod progress;

pub use builder::{Pipeline, PipelineBuilder};
pub use outliers::OutlierCapper;
pub use partitioning::Repartitioner;
pub use progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
