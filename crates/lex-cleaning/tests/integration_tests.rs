//! Integration tests for the cleaning pipeline.
//!
//! These tests verify end-to-end behavior of the pipeline on partitioned
//! datasets, including the on-disk output.

use lex_cleaning::{
    Bounds, CancellationToken, CappingOrder, CastType, CategoricalRule, CleaningError, Dataset,
    OutlierRule, Pipeline, PipelineConfig, PipelineStage, ProgressUpdate, QuantileConfig,
    QuantileCoordinator, ReductionStrategy, TextRule,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn read_csv(path: &Path) -> DataFrame {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .expect("Failed to create CSV reader")
        .finish()
        .expect("Failed to read CSV file")
}

fn customers(partitions: usize) -> Dataset {
    let df = read_csv(&fixtures_path().join("customers.csv"));
    Dataset::from_frame(df, partitions).expect("Failed to partition fixture")
}

fn one_to_hundred(partitions: usize) -> Dataset {
    let values: Vec<i64> = (1..=100).collect();
    Dataset::from_frame(df!("numeric_column" => &values).unwrap(), partitions).unwrap()
}

fn in_memory() -> PipelineConfig {
    PipelineConfig::builder().save_to_disk(false).build().unwrap()
}

fn f64_values(dataset: &Dataset, column: &str) -> Vec<Option<f64>> {
    dataset
        .to_frame()
        .unwrap()
        .column(column)
        .unwrap()
        .cast(&DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .collect()
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[test]
fn test_full_pipeline_customers() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .require_column("name")
        .fill_value("age", 40.0)
        .fill_value("income", 55000.0)
        .fill_value("comment", "no comment")
        .text_rule(TextRule::new("comment"))
        .categorical_rule(
            CategoricalRule::new("subscribed")
                .alias("y", "yes")
                .alias("n", "no"),
        )
        .outlier_rule(OutlierRule::new("income").ranks(0.1, 0.9))
        .cast("subscribed", CastType::Boolean)
        .cast("signup_date", CastType::Date)
        .rename("name", "customer_name")
        .drop_column("id")
        .target_partitions(2)
        .output_dir(dir.path())
        .output_name("customers")
        .build()
        .unwrap();

    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(customers(3))
        .expect("Pipeline should complete successfully");

    let summary = &result.summary;
    assert_eq!(summary.rows_before, 20);
    assert_eq!(summary.rows_after, 17);
    assert_eq!(summary.rows_removed, 3);
    assert_eq!(summary.partitions_before, 3);
    assert_eq!(summary.partitions_after, 2);
    assert_eq!(summary.columns_after, 8);
    assert!(summary.data_quality_score_after >= summary.data_quality_score_before);

    let dedup = summary.stage(PipelineStage::Deduplication).unwrap();
    assert_eq!(dedup.after.rows, 18);

    assert_eq!(result.bounds["income"], Bounds::new(48000.0, 62000.0).unwrap());

    let frame = result.dataset.to_frame().unwrap();
    assert!(frame.column("id").is_err());
    assert!(frame.column("customer_name").is_ok());
    assert_eq!(frame.column("subscribed").unwrap().dtype(), &DataType::Boolean);
    assert_eq!(frame.column("subscribed").unwrap().null_count(), 0);
    assert_eq!(frame.column("signup_date").unwrap().dtype(), &DataType::Date);
    assert_eq!(frame.column("signup_date").unwrap().null_count(), 1);
    assert_eq!(frame.column("age").unwrap().null_count(), 0);

    let texts: Vec<String> = frame
        .column("cleaned_text")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    assert!(texts.contains(&"great service".to_string()));
    assert!(texts.contains(&"worst experience".to_string()));
    assert!(texts.contains(&"no comment".to_string()));

    let capped: Vec<f64> = f64_values(&result.dataset, "income_capped")
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(capped.len(), 17);
    assert_eq!(capped.iter().cloned().fold(f64::INFINITY, f64::min), 48000.0);
    assert_eq!(capped.iter().cloned().fold(f64::NEG_INFINITY, f64::max), 62000.0);

    // on-disk layout
    let output = result.output_path.clone().unwrap();
    assert_eq!(output, dir.path().join("customers"));
    assert!(output.join("_SUCCESS").exists());
    let written: usize = (0..2)
        .map(|i| read_csv(&output.join(format!("part-{:05}.csv", i))).height())
        .sum();
    assert_eq!(written, 17);
    assert!(dir.path().join("customers_report.json").exists());
}

#[test]
fn test_processing_steps_follow_stage_order() {
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .outlier_rule(OutlierRule::new("income"))
        .target_partitions(2)
        .build()
        .unwrap();

    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(customers(4))
        .unwrap();

    let stages: Vec<PipelineStage> = result.summary.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
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
    assert!(
        result
            .processing_steps
            .iter()
            .any(|step| step.contains("income_capped"))
    );
}

// ============================================================================
// Quantile Bounds Tests
// ============================================================================

#[test]
fn test_bounds_one_to_hundred_four_partitions() {
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .outlier_rule(OutlierRule::new("numeric_column"))
        .build()
        .unwrap();

    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(one_to_hundred(4))
        .unwrap();

    let bounds = result.bounds["numeric_column"];
    assert!((bounds.lower - 5.0).abs() <= 1.0, "lower = {}", bounds.lower);
    assert!((bounds.upper - 95.0).abs() <= 1.0, "upper = {}", bounds.upper);

    let capped = f64_values(&result.dataset, "numeric_column_capped");
    assert!(capped.iter().flatten().all(|v| *v >= bounds.lower && *v <= bounds.upper));
}

#[test]
fn test_reduction_strategies_agree_within_epsilon() {
    // 20k values, shuffled deterministically across 7 partitions
    let values: Vec<f64> = (0..20_000u64)
        .map(|i| ((i * 7919) % 20_000) as f64)
        .collect();
    let dataset = Dataset::from_frame(df!("v" => &values).unwrap(), 7).unwrap();

    let epsilon = 0.01;
    let ranks = [0.01, 0.25, 0.5, 0.75, 0.99];
    let tolerance = epsilon * values.len() as f64 + 1.0;

    for reduction in [ReductionStrategy::Tree, ReductionStrategy::Sequential] {
        let coordinator = QuantileCoordinator::new(QuantileConfig { epsilon, reduction });
        let estimates = coordinator.estimate(dataset.partitions(), "v", &ranks).unwrap();
        assert_eq!(estimates.count, 20_000);

        for (rank, value) in estimates.iter() {
            // values are a permutation of 0..20000, so value == its 0-based rank
            let exact = rank * values.len() as f64;
            assert!(
                (value - exact).abs() <= tolerance,
                "{:?}: rank {} gave {}, expected about {}",
                reduction,
                rank,
                value,
                exact
            );
        }
    }
}

#[test]
fn test_capping_is_idempotent() {
    let rule = OutlierRule::new("numeric_column").ranks(0.1, 0.9).in_place();
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .remove_duplicates(false)
        .outlier_rule(rule)
        .build()
        .unwrap();
    let pipeline = Pipeline::builder().config(config).build().unwrap();

    let once = pipeline.process(one_to_hundred(3)).unwrap();
    let twice = pipeline.process(once.dataset.clone()).unwrap();

    assert_eq!(
        f64_values(&once.dataset, "numeric_column"),
        f64_values(&twice.dataset, "numeric_column")
    );
    assert_eq!(once.bounds, twice.bounds);
}

#[test]
fn test_identical_values_give_degenerate_bounds() {
    let frame = df!("numeric_column" => &[7.5f64; 40]).unwrap();
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .remove_duplicates(false)
        .outlier_rule(OutlierRule::new("numeric_column"))
        .build()
        .unwrap();

    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(Dataset::from_frame(frame, 4).unwrap())
        .unwrap();

    assert_eq!(result.bounds["numeric_column"], Bounds::new(7.5, 7.5).unwrap());
}

// ============================================================================
// Capping Order Tests
// ============================================================================

fn string_prices() -> Dataset {
    let frame = df!("price" => &["$10", "12", "11", "9", "1,000", "13", "8", "oops", "10", "-500"])
        .unwrap();
    Dataset::from_frame(frame, 2).unwrap()
}

#[test]
fn test_capping_after_coercion_handles_string_columns() {
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .capping_order(CappingOrder::AfterCoercion)
        .cast("price", CastType::Double)
        .outlier_rule(OutlierRule::new("price").ranks(0.2, 0.8).in_place())
        .build()
        .unwrap();

    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(string_prices())
        .unwrap();

    // 9 parsed values: -500, 8, 9, 10, 10, 11, 12, 13, 1000
    assert_eq!(result.bounds["price"], Bounds::new(8.0, 13.0).unwrap());
    let values = f64_values(&result.dataset, "price");
    assert_eq!(values.iter().filter(|v| v.is_none()).count(), 1);
    assert!(values.iter().flatten().all(|v| (8.0..=13.0).contains(v)));
}

#[test]
fn test_capping_before_coercion_rejects_string_columns() {
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .cast("price", CastType::Double)
        .outlier_rule(OutlierRule::new("price"))
        .build()
        .unwrap();

    let err = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(string_prices())
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(PipelineStage::OutlierCapping));
    assert!(matches!(err.root_cause(), CleaningError::SchemaMismatch { .. }));
    assert_eq!(err.error_code(), "STAGE_FAILED");
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_all_null_column_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let frame = df!(
        "id" => &[1i64, 2, 3],
        "numeric_column" => &[None::<f64>, None, None]
    )
    .unwrap();
    let config = PipelineConfig::builder()
        .outlier_rule(OutlierRule::new("numeric_column"))
        .output_dir(dir.path())
        .build()
        .unwrap();

    let err = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(Dataset::from_frame(frame, 1).unwrap())
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(PipelineStage::OutlierCapping));
    assert!(matches!(err.root_cause(), CleaningError::EmptySketch));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_required_column_fails() {
    let config = PipelineConfig::builder()
        .save_to_disk(false)
        .require_column("does_not_exist")
        .build()
        .unwrap();

    let err = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(customers(2))
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(PipelineStage::MissingValues));
    assert!(matches!(err.root_cause(), CleaningError::ColumnNotFound(_)));
}

#[test]
fn test_existing_output_is_not_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let build = |overwrite: bool| {
        let config = PipelineConfig::builder()
            .output_dir(dir.path())
            .output_name("run")
            .overwrite(overwrite)
            .generate_reports(false)
            .build()
            .unwrap();
        Pipeline::builder().config(config).build().unwrap()
    };

    build(false).process(customers(2)).unwrap();
    let err = build(false).process(customers(2)).unwrap_err();
    assert_eq!(err.failed_stage(), Some(PipelineStage::Writing));

    let result = build(true).process(customers(2)).unwrap();
    assert_eq!(result.output_path, Some(dir.path().join("run")));
}

#[test]
fn test_unwritable_report_leaves_no_dataset() {
    let dir = tempfile::tempdir().unwrap();
    // the report file cannot be created where a directory already sits
    std::fs::create_dir_all(dir.path().join("run_report.json")).unwrap();
    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .output_name("run")
        .build()
        .unwrap();

    let err = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(customers(2))
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(PipelineStage::Writing));
    assert!(!dir.path().join("run").exists());
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("run_report.json")]);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_pipeline_cancellation_before_start() {
    let token = CancellationToken::new();
    token.cancel();

    let result = Pipeline::builder()
        .config(in_memory())
        .cancellation_token(token)
        .build()
        .unwrap()
        .process(customers(2));

    assert!(matches!(result, Err(CleaningError::Cancelled)));
}

#[test]
fn test_pipeline_cancellation_between_stages() {
    let token = CancellationToken::new();
    let token_for_cancel = token.clone();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let stages_clone = stages.clone();

    let result = Pipeline::builder()
        .config(in_memory())
        .cancellation_token(token)
        .on_progress(move |update: ProgressUpdate| {
            if update.stage == PipelineStage::TextNormalization && update.stage_progress >= 1.0 {
                token_for_cancel.cancel();
            }
            stages_clone.lock().unwrap().push(update.stage);
        })
        .build()
        .unwrap()
        .process(customers(2));

    assert!(matches!(result, Err(CleaningError::Cancelled)));

    let stages = stages.lock().unwrap();
    assert!(!stages.contains(&PipelineStage::CategoricalNormalization));
    assert_eq!(stages.last(), Some(&PipelineStage::Cancelled));
}

// ============================================================================
// Progress Tests
// ============================================================================

#[test]
fn test_pipeline_progress_is_monotonic() {
    let progress = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = progress.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    Pipeline::builder()
        .config(in_memory())
        .on_progress(move |update| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            progress_clone.lock().unwrap().push(update.progress);
        })
        .build()
        .unwrap()
        .process(customers(2))
        .unwrap();

    let progress = progress.lock().unwrap();
    assert!(calls.load(Ordering::SeqCst) > 0);
    assert!(progress.windows(2).all(|w| w[0] <= w[1] + 1e-6));
    assert_eq!(progress.last(), Some(&1.0));
}
