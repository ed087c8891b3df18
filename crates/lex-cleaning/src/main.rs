//! CLI entry point for the cleaning pipeline.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use lex_cleaning::{
    CleaningError, Dataset, OutlierRule, Pipeline, PipelineConfig, PipelineResult,
    QuantileCoordinator, ReductionStrategy, ReportGenerator,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// CLI-compatible reduction strategy enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliReduction {
    /// Merge partition sketches pairwise, level by level
    Tree,
    /// Merge partition sketches left to right
    Sequential,
}

impl From<CliReduction> for ReductionStrategy {
    fn from(cli: CliReduction) -> Self {
        match cli {
            CliReduction::Tree => ReductionStrategy::Tree,
            CliReduction::Sequential => ReductionStrategy::Sequential,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Partition-parallel data cleaning with sketch-based outlier capping",
    long_about = "Cleans a CSV file as a set of partitions: deduplication, missing values, \
                  text and categorical normalization, quantile-based outlier capping, \
                  type coercion, renames/drops and repartitioning.\n\n\
                  EXAMPLES:\n  \
                  # Cap one column at its 5th/95th percentiles\n  \
                  lex-cleaning -i data.csv --cap price\n\n  \
                  # Full configuration from a JSON file\n  \
                  lex-cleaning -i data.csv -c pipeline.json -o results/\n\n  \
                  # Preview the stage plan and estimated bounds\n  \
                  lex-cleaning -i data.csv --cap price --dry-run"
)]
struct Args {
    /// Path to the CSV file to process
    #[arg(short, long)]
    input: String,

    /// Pipeline configuration (JSON form of PipelineConfig)
    ///
    /// Command line flags override values from the file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long, default_value = "./outputs")]
    output: String,

    /// Name of the dataset directory under the output directory
    #[arg(long)]
    output_name: Option<String>,

    /// Number of partitions the input is split into
    #[arg(short, long, default_value = "4")]
    partitions: usize,

    /// Rank error of the quantile sketches, in (0, 1)
    #[arg(long)]
    epsilon: Option<f64>,

    /// How partition sketches are merged
    #[arg(long, value_enum)]
    reduction: Option<CliReduction>,

    /// Cap COLUMN at its 5th/95th percentiles into COLUMN_capped (repeatable)
    #[arg(long, value_name = "COLUMN")]
    cap: Vec<String>,

    /// Number of output partitions
    #[arg(long)]
    target_partitions: Option<usize>,

    /// Keep results in memory; write nothing
    #[arg(long)]
    no_write: bool,

    /// Replace an existing output dataset
    #[arg(long)]
    overwrite: bool,

    /// Print the first N cleaned rows
    #[arg(long, value_name = "N")]
    preview: Option<usize>,

    /// Print the stage plan and estimated bounds without processing
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,

    /// Write the JSON run report next to the output dataset
    #[arg(short = 'r', long)]
    emit_report: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    let config = build_config(&args)?;
    let pipeline = Pipeline::builder().config(config).build()?;

    info!("Loading dataset from: {}", args.input);
    let data = load_csv_with_fallbacks(&args.input)?;
    info!("Dataset loaded successfully: {:?}", data.shape());
    let dataset = Dataset::from_frame(data, args.partitions)?;

    if args.dry_run {
        return run_dry_run(&args, &pipeline, &dataset);
    }

    run_pipeline(&pipeline, &args, dataset)
}

/// Merge the optional config file with command line overrides.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => PipelineConfig::builder()
            .output_dir(&args.output)
            .generate_reports(false)
            .build()?,
    };

    if args.config.is_none() || args.output != "./outputs" {
        config.output_dir = PathBuf::from(&args.output);
    }
    if let Some(name) = &args.output_name {
        config.output_name = Some(name.clone());
    }
    if let Some(epsilon) = args.epsilon {
        config.quantile.epsilon = epsilon;
    }
    if let Some(reduction) = args.reduction {
        config.quantile.reduction = reduction.into();
    }
    config
        .outlier_rules
        .extend(args.cap.iter().map(OutlierRule::new));
    if let Some(target) = args.target_partitions {
        config.target_partitions = Some(target);
    }
    if args.no_write {
        config.save_to_disk = false;
    }
    if args.overwrite {
        config.overwrite = true;
    }
    if args.emit_report {
        config.generate_reports = true;
    }

    config.validate()?;
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Show the stage plan and capping bounds without running the pipeline.
///
/// Note: This function uses `println!` intentionally for user-facing CLI output.
fn run_dry_run(args: &Args, pipeline: &Pipeline, dataset: &Dataset) -> Result<()> {
    let config = pipeline.config();

    println!("\n{}", "=".repeat(80));
    println!("DRY RUN - Preview of cleaning stages");
    println!("{}\n", "=".repeat(80));

    println!("DATASET OVERVIEW");
    println!("{}", "-".repeat(40));
    println!("  File: {}", args.input);
    println!("  Rows: {}", dataset.height());
    println!("  Columns: {}", dataset.width());
    println!("  Partitions: {}", dataset.num_partitions());
    println!();

    println!("STAGE PLAN");
    println!("{}", "-".repeat(40));
    for (i, stage) in pipeline.stage_plan().iter().enumerate() {
        println!("  {}. {}", i + 1, stage.display_name());
    }
    println!();

    println!("CAPPING BOUNDS (epsilon = {})", config.quantile.epsilon);
    println!("{}", "-".repeat(40));
    if config.outlier_rules.is_empty() {
        println!("  No outlier rules configured");
    }
    let coordinator = QuantileCoordinator::new(config.quantile);
    for rule in &config.outlier_rules {
        match coordinator.estimate_bounds(
            dataset.partitions(),
            &rule.column,
            rule.lower_rank,
            rule.upper_rank,
        ) {
            Ok(bounds) => println!(
                "  {:<20} [{}, {}] -> {}",
                truncate_str(&rule.column, 19),
                bounds.lower,
                bounds.upper,
                rule.output_column_name()
            ),
            Err(e) => println!("  {:<20} unavailable: {}", truncate_str(&rule.column, 19), e),
        }
    }
    println!();

    if config.save_to_disk {
        let output = ReportGenerator::new(
            config.output_dir.clone(),
            config.dataset_name(),
            config.overwrite,
        );
        println!("OUTPUT (will be created)");
        println!("{}", "-".repeat(40));
        println!("  - {}/part-*.csv", output.dataset_dir().display());
        if config.generate_reports {
            println!("  - {}", output.report_path().display());
        }
        println!();
    }

    println!("{}", "=".repeat(80));
    println!("To execute this cleaning, run without --dry-run");
    println!("{}", "=".repeat(80));

    Ok(())
}

/// Truncate a string to max length with ellipsis
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Run pipeline and print results
fn run_pipeline(pipeline: &Pipeline, args: &Args, dataset: Dataset) -> Result<()> {
    info!("{}", "=".repeat(80));
    info!("Starting cleaning pipeline...");
    info!("{}", "=".repeat(80));

    match pipeline.process(dataset) {
        Ok(result) => handle_pipeline_output(&result, args),
        Err(e) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&e)?);
            }
            error!("Pipeline failed: {}", e);
            Err(anyhow!(failure_message(&e)))
        }
    }
}

fn failure_message(e: &CleaningError) -> String {
    match e.failed_stage() {
        Some(stage) => format!(
            "Pipeline failed at '{}': {}",
            stage.display_name(),
            e.root_cause()
        ),
        None => format!("Pipeline failed: {}", e),
    }
}

/// Handle pipeline output based on CLI flags.
///
/// Output behavior:
/// - Default: Print human-readable summary to stdout
/// - `--json`: Print JSON to stdout only (no logs)
/// - `--preview N`: Also print the first N cleaned rows
fn handle_pipeline_output(result: &PipelineResult, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.report())?);
        return Ok(());
    }

    print_human_readable_summary(result, args);

    if let Some(rows) = args.preview {
        let frame = result.dataset.to_frame()?;
        println!("{}", frame.head(Some(rows)));
    }

    Ok(())
}

/// Print a human-readable summary of the cleaning results.
fn print_human_readable_summary(result: &PipelineResult, args: &Args) {
    let summary = &result.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("CLEANING COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    println!(
        "Input:  {} ({} rows x {} columns, {} partitions)",
        args.input, summary.rows_before, summary.columns_before, summary.partitions_before
    );
    match &result.output_path {
        Some(path) => println!(
            "Output: {} ({} rows x {} columns, {} partitions)",
            path.display(),
            summary.rows_after,
            summary.columns_after,
            summary.partitions_after
        ),
        None => println!(
            "Output: in memory ({} rows x {} columns, {} partitions)",
            summary.rows_after, summary.columns_after, summary.partitions_after
        ),
    }
    println!();

    println!("Processing Summary:");
    println!("  Duration: {}ms", summary.duration_ms);
    println!(
        "  Rows: {} -> {} ({} removed)",
        summary.rows_before, summary.rows_after, summary.rows_removed
    );
    println!(
        "  Data Quality: {:.1}% -> {:.1}%",
        summary.data_quality_score_before * 100.0,
        summary.data_quality_score_after * 100.0
    );
    println!();

    if !result.bounds.is_empty() {
        println!("Capping Bounds:");
        for (column, bounds) in &result.bounds {
            println!("  {:<20} [{}, {}]", truncate_str(column, 19), bounds.lower, bounds.upper);
        }
        println!();
    }

    println!("Stages:");
    for stage in &summary.stages {
        println!(
            "  {:<28} {:>6}ms  {} -> {} rows",
            stage.stage.display_name(),
            stage.duration_ms,
            stage.before.rows,
            stage.after.rows
        );
        for action in stage.actions.iter().take(5) {
            println!("      - {}", action);
        }
        if stage.actions.len() > 5 {
            println!("      ... and {} more actions", stage.actions.len() - 5);
        }
    }
    println!();

    if !summary.warnings.is_empty() {
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  ! {}", warning);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}

/// Load CSV with multiple fallback strategies
fn load_csv_with_fallbacks(path: &str) -> Result<DataFrame> {
    match CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()
    {
        Ok(df) => return Ok(df),
        Err(e) => {
            debug!("Standard loading failed: {}", e);
        }
    }

    // Retry on pre-cleaned content: collapsed quotes, no blank lines
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read file {}", path))?;
    let cleaned = clean_csv_content(&content);

    CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .into_reader_with_file_handle(std::io::Cursor::new(cleaned))
        .finish()
        .map_err(|e| anyhow!("Failed to parse {}: {}", path, e))
}

fn clean_csv_content(content: &str) -> String {
    content
        .replace("\"\"\"", "\"")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
