//! Partition-parallel tabular data cleaning
//!
//! A data cleaning library built with Rust and Polars, centered on a
//! mergeable approximate quantile sketch.
//!
//! # Overview
//!
//! A [`Dataset`] is a list of Polars frames sharing one schema. The
//! [`Pipeline`] runs a fixed sequence of stages over it:
//!
//! - **Deduplication**: drop repeated rows, keeping the first occurrence
//! - **Missing values**: drop rows lacking required columns, fill the rest
//! - **Text and categorical normalization**: regex strip, case, aliases
//! - **Outlier capping**: clamp columns to bounds estimated by
//!   [`QuantileCoordinator`] from per-partition [`QuantileSketch`]es
//! - **Type coercion**, **renames/drops**, **repartitioning** and **writing**
//!
//! Capping never sorts or gathers a column. Each partition builds a sketch
//! with rank error at most ε, the sketches are merged into one global
//! summary, and bounds are read from it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_cleaning::{Dataset, OutlierRule, Pipeline, PipelineConfig};
//! use polars::prelude::*;
//!
//! let df = CsvReadOptions::default()
//!     .with_has_header(true)
//!     .try_into_reader_with_file_path(Some("data.csv".into()))?
//!     .finish()?;
//!
//! let config = PipelineConfig::builder()
//!     .outlier_rule(OutlierRule::new("price"))
//!     .target_partitions(10)
//!     .output_dir("outputs")
//!     .build()?;
//!
//! let result = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .process(Dataset::from_frame(df, 4)?)?;
//!
//! println!("price bounds: {:?}", result.bounds["price"]);
//! ```
//!
//! # Quantiles only
//!
//! The coordinator works on anything implementing [`PartitionScanner`]:
//!
//! ```rust,ignore
//! use lex_cleaning::{QuantileConfig, QuantileCoordinator};
//!
//! let coordinator = QuantileCoordinator::new(QuantileConfig::default());
//! let estimates = coordinator.estimate(dataset.partitions(), "price", &[0.05, 0.95])?;
//! ```
//!
//! # Cancellation
//!
//! A [`CancellationToken`] is checked between stages:
//!
//! ```rust,ignore
//! let token = CancellationToken::new();
//! let pipeline = Pipeline::builder().cancellation_token(token.clone()).build()?;
//!
//! match pipeline.process(dataset) {
//!     Ok(result) => println!("Success!"),
//!     Err(CleaningError::Cancelled) => println!("Cancelled by user"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```

pub mod cleaner;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod quantile;
pub mod reporting;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use cleaner::{DataCleaner, TypeCoercer};
pub use config::{
    CappingOrder, CastRule, CastType, CategoricalRule, ConfigValidationError, FillValue,
    OutlierRule, PipelineConfig, PipelineConfigBuilder, QuantileConfig, ReductionStrategy,
    RenameRule, TextRule,
};
pub use dataset::{Dataset, Partition, PartitionScanner};
pub use error::{CleaningError, Result as CleaningResult, ResultExt};
pub use pipeline::{
    CancellationToken, ClosureProgressReporter, OutlierCapper, Pipeline, PipelineBuilder,
    PipelineStage, ProgressReporter, ProgressUpdate, Repartitioner,
};
pub use quantile::{Bounds, QuantileCoordinator, QuantileEstimates, QuantileSketch};
pub use reporting::ReportGenerator;
pub use types::{CleaningReport, CleaningSummary, DatasetShape, PipelineResult, StageReport};
