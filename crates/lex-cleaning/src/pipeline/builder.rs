//! Main cleaning pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! sequencing the cleaning stages over a partitioned [`Dataset`].

use crate::cleaner::{DataCleaner, TypeCoercer};
use crate::config::{CappingOrder, ConfigValidationError, PipelineConfig};
use crate::dataset::Dataset;
use crate::error::{CleaningError, Result};
use crate::pipeline::outliers::OutlierCapper;
use crate::pipeline::partitioning::Repartitioner;
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::quantile::Bounds;
use crate::reporting::ReportGenerator;
use crate::types::{CleaningSummary, DatasetShape, PipelineResult, StageReport};
use crate::utils;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// The main cleaning pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use lex_cleaning::{CancellationToken, Dataset, OutlierRule, Pipeline, PipelineConfig};
///
/// let token = CancellationToken::new();
/// let config = PipelineConfig::builder()
///     .outlier_rule(OutlierRule::new("price"))
///     .target_partitions(10)
///     .build()?;
///
/// let result = Pipeline::builder()
///     .config(config)
///     .cancellation_token(token.clone())
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .process(Dataset::from_frame(df, 4)?)?;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    cleaner: DataCleaner,
    capper: OutlierCapper,
    coercer: TypeCoercer,
    repartitioner: Repartitioner,
    reporter: ReportGenerator,
}

// Ensure Pipeline is Send (can be moved to a worker thread)
static_assertions::assert_impl_all!(Pipeline: Send);

/// Mutable state threaded through the stages of one run.
#[derive(Default)]
struct RunState {
    bounds: BTreeMap<String, Bounds>,
    output_path: Option<PathBuf>,
    processing_steps: Vec<String>,
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The configuration this pipeline runs with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stages in the order [`process`](Self::process) runs them.
    ///
    /// Outlier capping sits before type coercion unless the configuration
    /// asks for [`CappingOrder::AfterCoercion`]. Writing is only planned when
    /// saving to disk.
    pub fn stage_plan(&self) -> Vec<PipelineStage> {
        let mut plan = vec![
            PipelineStage::Deduplication,
            PipelineStage::MissingValues,
            PipelineStage::TextNormalization,
            PipelineStage::CategoricalNormalization,
        ];
        match self.config.capping_order {
            CappingOrder::BeforeCoercion => {
                plan.push(PipelineStage::OutlierCapping);
                plan.push(PipelineStage::TypeCoercion);
            }
            CappingOrder::AfterCoercion => {
                plan.push(PipelineStage::TypeCoercion);
                plan.push(PipelineStage::OutlierCapping);
            }
        }
        plan.push(PipelineStage::SchemaPruning);
        plan.push(PipelineStage::Repartitioning);
        if self.config.save_to_disk {
            plan.push(PipelineStage::Writing);
        }
        plan
    }

    /// Run every planned stage over `dataset`.
    ///
    /// Returns a `PipelineResult` containing the cleaned dataset, the capping
    /// bounds and a per-stage summary.
    ///
    /// # Errors
    ///
    /// Returns `Err(CleaningError::Cancelled)` if the pipeline was cancelled
    /// via the cancellation token. Any stage failure aborts the run as
    /// `CleaningError::StageFailed`; nothing is written in that case.
    pub fn process(&self, dataset: Dataset) -> Result<PipelineResult> {
        match self.process_internal(dataset) {
            Ok(result) => {
                self.report_progress(ProgressUpdate::complete("Pipeline completed successfully"));
                Ok(result)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    /// Check if cancellation has been requested.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(CleaningError::Cancelled);
        }
        Ok(())
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn process_internal(&self, dataset: Dataset) -> Result<PipelineResult> {
        let start_time = Instant::now();

        info!("Starting cleaning pipeline...");
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            "Starting cleaning pipeline...",
        ));

        let mut summary = CleaningSummary::new();
        let before = DatasetShape::of(&dataset);
        summary.rows_before = before.rows;
        summary.columns_before = before.columns;
        summary.partitions_before = before.partitions;
        summary.data_quality_score_before = quality_score(&dataset);
        info!(
            "Input: {} rows, {} columns in {} partitions",
            before.rows, before.columns, before.partitions
        );

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            1.0,
            "Initialization complete",
        ));

        let mut state = RunState::default();
        let mut dataset = dataset;
        for stage in self.stage_plan() {
            self.check_cancelled()?;
            dataset = self.run_stage(stage, dataset, &mut state, &mut summary)?;
        }

        let after = DatasetShape::of(&dataset);
        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        summary.rows_after = after.rows;
        summary.columns_after = after.columns;
        summary.partitions_after = after.partitions;
        summary.rows_removed = summary.rows_before.saturating_sub(summary.rows_after);
        summary.data_quality_score_after = quality_score(&dataset);

        if summary.rows_removed_percentage() > 30.0 {
            summary.add_warning(format!(
                "High data loss: {:.1}% of rows were removed",
                summary.rows_removed_percentage()
            ));
        }

        let result = PipelineResult {
            dataset,
            bounds: state.bounds,
            summary,
            processing_steps: state.processing_steps,
            output_path: state.output_path,
        };

        if self.config.save_to_disk {
            let report = self.config.generate_reports.then(|| result.report());
            self.reporter
                .commit(report.as_ref())
                .map_err(|e| e.in_stage(PipelineStage::Writing))?;
        }

        info!(
            "Pipeline finished in {} ms: {} -> {} rows",
            result.summary.duration_ms, result.summary.rows_before, result.summary.rows_after
        );
        Ok(result)
    }

    /// Run one stage, timing it and recording its report.
    fn run_stage(
        &self,
        stage: PipelineStage,
        dataset: Dataset,
        state: &mut RunState,
        summary: &mut CleaningSummary,
    ) -> Result<Dataset> {
        info!("{}...", stage.display_name());
        self.report_progress(ProgressUpdate::new(
            stage,
            0.0,
            format!("{}...", stage.display_name()),
        ));

        let started = Instant::now();
        let before = DatasetShape::of(&dataset);
        let (dataset, actions) = self
            .apply_stage(stage, dataset, state)
            .map_err(|e| e.in_stage(stage))?;
        let after = DatasetShape::of(&dataset);

        debug!(
            "{} done: {} -> {} rows, {} -> {} columns",
            stage.display_name(),
            before.rows,
            after.rows,
            before.columns,
            after.columns
        );

        state.processing_steps.extend(actions.iter().cloned());
        summary.add_stage(StageReport {
            stage,
            duration_ms: started.elapsed().as_millis() as u64,
            before,
            after,
            actions,
        });

        self.report_progress(ProgressUpdate::new(
            stage,
            1.0,
            format!("{} complete", stage.display_name()),
        ));
        Ok(dataset)
    }

    fn apply_stage(
        &self,
        stage: PipelineStage,
        dataset: Dataset,
        state: &mut RunState,
    ) -> Result<(Dataset, Vec<String>)> {
        let config = &self.config;
        match stage {
            PipelineStage::Deduplication => {
                if !config.remove_duplicates {
                    return Ok((dataset, vec!["Duplicate removal disabled".to_string()]));
                }
                self.cleaner
                    .remove_duplicates(dataset, config.duplicate_subset.as_deref())
            }
            PipelineStage::MissingValues => self.cleaner.handle_missing_values(
                dataset,
                &config.required_columns,
                &config.fill_values,
            ),
            PipelineStage::TextNormalization => {
                self.cleaner.normalize_text(dataset, &config.text_rules)
            }
            PipelineStage::CategoricalNormalization => self
                .cleaner
                .normalize_categories(dataset, &config.categorical_rules),
            PipelineStage::OutlierCapping => {
                let mut actions = Vec::new();
                let mut dataset = dataset;
                let total = config.outlier_rules.len();
                for (i, rule) in config.outlier_rules.iter().enumerate() {
                    self.report_progress(ProgressUpdate::with_items(
                        stage,
                        format!("Column: {}", rule.column),
                        i,
                        total,
                        format!("Estimating bounds for '{}'", rule.column),
                    ));
                    let (capped, bounds) = self.capper.cap_outliers(
                        dataset,
                        std::slice::from_ref(rule),
                        &mut actions,
                    )?;
                    dataset = capped;
                    state.bounds.extend(bounds);
                }
                Ok((dataset, actions))
            }
            PipelineStage::TypeCoercion => self.coercer.coerce(dataset, &config.casts),
            PipelineStage::SchemaPruning => {
                self.cleaner
                    .prune_schema(dataset, &config.renames, &config.drop_columns)
            }
            PipelineStage::Repartitioning => match config.target_partitions {
                Some(target) => self.repartitioner.repartition(dataset, target),
                None => Ok((dataset, vec!["Repartitioning skipped".to_string()])),
            },
            PipelineStage::Writing => {
                let path = self.reporter.stage_dataset(&dataset)?;
                let action = format!(
                    "Wrote {} partitions to {}",
                    dataset.num_partitions(),
                    path.display()
                );
                state.output_path = Some(path);
                Ok((dataset, vec![action]))
            }
            PipelineStage::Initializing
            | PipelineStage::Complete
            | PipelineStage::Cancelled
            | PipelineStage::Failed => Err(CleaningError::Internal(format!(
                "'{}' is not a runnable stage",
                stage.display_name()
            ))),
        }
    }
}

/// Share of non-null cells across all partitions.
fn quality_score(dataset: &Dataset) -> f32 {
    utils::completeness(dataset.partitions().iter().map(|p| p.frame()))
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started.
///
/// # Example
///
/// ```rust,ignore
/// use lex_cleaning::{Pipeline, PipelineConfig, CancellationToken};
///
/// let token = CancellationToken::new();
///
/// let pipeline = Pipeline::builder()
///     .config(PipelineConfig::default())
///     .cancellation_token(token)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?;
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use lex_cleaning::{ProgressReporter, ProgressUpdate};
    /// use std::sync::Arc;
    ///
    /// struct MyReporter;
    ///
    /// impl ProgressReporter for MyReporter {
    ///     fn report(&self, update: ProgressUpdate) {
    ///         println!("{}: {}", update.stage.display_name(), update.message);
    ///     }
    /// }
    ///
    /// let pipeline = Pipeline::builder()
    ///     .progress_reporter(Arc::new(MyReporter))
    ///     .build()?;
    /// ```
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the pipeline.
    ///
    /// Clone the token and call [`CancellationToken::cancel()`] from any
    /// thread. The token is checked before every stage; a running stage is
    /// never interrupted.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let reporter = ReportGenerator::new(
            config.output_dir.clone(),
            config.dataset_name(),
            config.overwrite,
        );

        Ok(Pipeline {
            capper: OutlierCapper::new(config.quantile),
            repartitioner: Repartitioner::new(config.repartition_seed),
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
            cleaner: DataCleaner,
            coercer: TypeCoercer,
            reporter,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutlierRule;
    use polars::df;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn in_memory() -> PipelineConfig {
        PipelineConfig::builder().save_to_disk(false).build().unwrap()
    }

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert!(pipeline.config.remove_duplicates);
        assert_eq!(pipeline.stage_plan().last(), Some(&PipelineStage::Writing));
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.quantile.epsilon = 0.0;
        assert!(matches!(
            Pipeline::builder().config(config).build(),
            Err(ConfigValidationError::InvalidEpsilon(_))
        ));
    }

    #[test]
    fn test_stage_plan_order() {
        let pipeline = Pipeline::builder().config(in_memory()).build().unwrap();
        assert_eq!(
            pipeline.stage_plan(),
            vec![
                PipelineStage::Deduplication,
                PipelineStage::MissingValues,
                PipelineStage::TextNormalization,
                PipelineStage::CategoricalNormalization,
                PipelineStage::OutlierCapping,
                PipelineStage::TypeCoercion,
                PipelineStage::SchemaPruning,
                PipelineStage::Repartitioning,
            ]
        );

        let config = PipelineConfig::builder()
            .save_to_disk(false)
            .capping_order(CappingOrder::AfterCoercion)
            .build()
            .unwrap();
        let plan = Pipeline::builder().config(config).build().unwrap().stage_plan();
        let coercion = plan.iter().position(|s| *s == PipelineStage::TypeCoercion);
        let capping = plan.iter().position(|s| *s == PipelineStage::OutlierCapping);
        assert!(coercion < capping);
    }

    #[test]
    fn test_pipeline_builder_with_cancellation_token() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let pipeline = Pipeline::builder()
            .cancellation_token(token)
            .build()
            .unwrap();

        assert!(!pipeline.cancellation_token.is_cancelled());
        token_clone.cancel();
        assert!(pipeline.cancellation_token.is_cancelled());
    }

    #[test]
    fn test_progress_reported_per_stage() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let pipeline = Pipeline::builder()
            .config(in_memory())
            .on_progress(move |_update| {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let dataset = Dataset::from_frame(df!("a" => &[1i64, 2, 3]).unwrap(), 1).unwrap();
        pipeline.process(dataset).unwrap();

        // two updates for initialization, two per stage, one completion
        let expected = 2 + 2 * pipeline.stage_plan().len() + 1;
        assert_eq!(call_count.load(Ordering::SeqCst), expected);
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();

        let pipeline = Pipeline::builder()
            .cancellation_token(token.clone())
            .build()
            .unwrap();

        assert!(pipeline.check_cancelled().is_ok());

        token.cancel();
        let result = pipeline.check_cancelled();
        assert!(matches!(result.unwrap_err(), CleaningError::Cancelled));
    }

    #[test]
    fn test_process_records_stage_reports_and_bounds() {
        let values: Vec<i64> = (1..=100).collect();
        let frame = df!("numeric_column" => &values).unwrap();
        let config = PipelineConfig::builder()
            .save_to_disk(false)
            .outlier_rule(OutlierRule::new("numeric_column"))
            .target_partitions(3)
            .build()
            .unwrap();

        let result = Pipeline::builder()
            .config(config)
            .build()
            .unwrap()
            .process(Dataset::from_frame(frame, 4).unwrap())
            .unwrap();

        assert_eq!(result.bounds["numeric_column"], Bounds::new(5.0, 95.0).unwrap());
        assert_eq!(result.summary.partitions_before, 4);
        assert_eq!(result.summary.partitions_after, 3);
        assert_eq!(result.summary.rows_after, 100);
        assert_eq!(result.summary.columns_after, 2);
        assert_eq!(result.summary.stages.len(), 8);
        assert!(result.output_path.is_none());

        let capping = result.summary.stage(PipelineStage::OutlierCapping).unwrap();
        assert_eq!(capping.before.columns, 1);
        assert_eq!(capping.after.columns, 2);
    }

    #[test]
    fn test_stage_failure_reports_failed_progress() {
        let frame = df!("numeric_column" => &[None::<f64>, None]).unwrap();
        let config = PipelineConfig::builder()
            .save_to_disk(false)
            .outlier_rule(OutlierRule::new("numeric_column"))
            .build()
            .unwrap();

        let last_stage = Arc::new(Mutex::new(None));
        let last_stage_clone = last_stage.clone();
        let pipeline = Pipeline::builder()
            .config(config)
            .on_progress(move |update| {
                *last_stage_clone.lock().unwrap() = Some(update.stage);
            })
            .build()
            .unwrap();

        let err = pipeline
            .process(Dataset::from_frame(frame, 1).unwrap())
            .unwrap_err();
        assert_eq!(err.failed_stage(), Some(PipelineStage::OutlierCapping));
        assert!(matches!(err.root_cause(), CleaningError::EmptySketch));
        assert_eq!(*last_stage.lock().unwrap(), Some(PipelineStage::Failed));
    }
}
