//! Configuration types for the cleaning pipeline.
//!
//! Every stage is driven by declarative rules on [`PipelineConfig`]. The
//! configuration deserializes from JSON (missing fields take their defaults)
//! and can also be assembled with [`PipelineConfig::builder()`].

use crate::quantile::DEFAULT_EPSILON;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Pattern removed from free-text columns by default: anything that is not
/// an ASCII letter, a digit or whitespace.
pub const DEFAULT_STRIP_PATTERN: &str = r"[^a-zA-Z0-9\s]";

/// Column written by a text rule when no target is given.
pub const DEFAULT_TEXT_TARGET: &str = "cleaned_text";

/// Default lower capping rank.
pub const DEFAULT_LOWER_RANK: f64 = 0.05;

/// Default upper capping rank.
pub const DEFAULT_UPPER_RANK: f64 = 0.95;

/// How partial sketches are combined into the global one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReductionStrategy {
    /// Merge adjacent pairs level by level, in parallel
    #[default]
    Tree,
    /// Fold partitions left to right
    Sequential,
}

/// Quantile estimation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantileConfig {
    /// Rank error of every sketch, in `(0, 1)`.
    /// Default: 0.01
    pub epsilon: f64,

    /// Default: Tree
    pub reduction: ReductionStrategy,
}

impl Default for QuantileConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            reduction: ReductionStrategy::default(),
        }
    }
}

/// Where outlier capping runs relative to type coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CappingOrder {
    /// Cap on the numeric columns as loaded, then coerce
    #[default]
    BeforeCoercion,
    /// Coerce first, then cap (lets string columns cast to double be capped)
    AfterCoercion,
}

/// Replacement used for nulls in one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FillValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FillValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FillValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Strip, lower-case and trim a text column into a new column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRule {
    pub source: String,

    #[serde(default = "default_text_target")]
    pub target: String,

    /// Regex whose matches are removed before case folding.
    #[serde(default = "default_strip_pattern")]
    pub strip_pattern: String,

    #[serde(default = "default_true")]
    pub lowercase: bool,

    #[serde(default = "default_true")]
    pub trim: bool,
}

impl TextRule {
    /// Rule with the default pattern writing to `cleaned_text`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: default_text_target(),
            strip_pattern: default_strip_pattern(),
            lowercase: true,
            trim: true,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// Trim and lower-case a categorical column in place, then map aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalRule {
    pub column: String,

    /// Normalized spelling -> canonical value, e.g. `"y" -> "yes"`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl CategoricalRule {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }
}

/// Clamp a numeric column to its `[lower_rank, upper_rank]` quantiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierRule {
    pub column: String,

    #[serde(default = "default_lower_rank")]
    pub lower_rank: f64,

    #[serde(default = "default_upper_rank")]
    pub upper_rank: f64,

    /// Column receiving the capped values; defaults to `<column>_capped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column: Option<String>,

    /// Overwrite the source column instead of adding a new one.
    #[serde(default)]
    pub in_place: bool,
}

impl OutlierRule {
    /// Rule with the default 5% / 95% ranks.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            lower_rank: DEFAULT_LOWER_RANK,
            upper_rank: DEFAULT_UPPER_RANK,
            output_column: None,
            in_place: false,
        }
    }

    pub fn ranks(mut self, lower: f64, upper: f64) -> Self {
        self.lower_rank = lower;
        self.upper_rank = upper;
        self
    }

    pub fn in_place(mut self) -> Self {
        self.in_place = true;
        self
    }

    /// Name of the column the capped values are written to.
    pub fn output_column_name(&self) -> String {
        if self.in_place {
            return self.column.clone();
        }
        self.output_column
            .clone()
            .unwrap_or_else(|| format!("{}_capped", self.column))
    }
}

/// Target type of a cast rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    Double,
    Integer,
    Boolean,
    String,
    Date,
}

impl CastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Date => "date",
        }
    }
}

/// Cast one column. Values that cannot be converted become null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastRule {
    pub column: String,
    pub to: CastType,
}

impl CastRule {
    pub fn new(column: impl Into<String>, to: CastType) -> Self {
        Self {
            column: column.into(),
            to,
        }
    }
}

/// Rename `from` to `to`. A missing `from` column is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

/// Configuration for the cleaning pipeline.
///
/// # Example
///
/// ```rust
/// use lex_cleaning::config::{CastType, OutlierRule, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .require_column("id")
///     .fill_value("category_column", "unknown")
///     .outlier_rule(OutlierRule::new("numeric_column"))
///     .cast("numeric_column", CastType::Double)
///     .target_partitions(10)
///     .save_to_disk(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.outlier_rules.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whether to remove duplicate rows.
    /// Default: true
    pub remove_duplicates: bool,

    /// Columns that define a duplicate. `None` compares whole rows.
    pub duplicate_subset: Option<Vec<String>>,

    /// Rows with a null in any of these columns are dropped.
    pub required_columns: Vec<String>,

    /// Per-column null replacements, applied after the drop.
    pub fill_values: BTreeMap<String, FillValue>,

    pub text_rules: Vec<TextRule>,

    pub categorical_rules: Vec<CategoricalRule>,

    pub outlier_rules: Vec<OutlierRule>,

    pub quantile: QuantileConfig,

    /// Default: BeforeCoercion
    pub capping_order: CappingOrder,

    pub casts: Vec<CastRule>,

    pub renames: Vec<RenameRule>,

    pub drop_columns: Vec<String>,

    /// Number of output partitions. `None` keeps the input partitioning.
    /// Default: None
    pub target_partitions: Option<usize>,

    /// Seed for the round-robin start offsets of repartitioning.
    /// Default: 0
    pub repartition_seed: u64,

    /// Output directory for the cleaned partitions and the run report.
    /// Default: "output"
    pub output_dir: PathBuf,

    /// Name of the dataset directory under `output_dir`.
    /// If None, uses "cleaned_dataset".
    /// Default: None
    pub output_name: Option<String>,

    /// Replace an existing output directory instead of failing.
    /// Default: false
    pub overwrite: bool,

    /// Whether to write the JSON run report next to the output.
    /// Default: true
    pub generate_reports: bool,

    /// Whether to save cleaned data and reports to disk.
    /// When false, results are kept in memory only.
    /// Default: true
    pub save_to_disk: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            remove_duplicates: true,
            duplicate_subset: None,
            required_columns: Vec::new(),
            fill_values: BTreeMap::new(),
            text_rules: Vec::new(),
            categorical_rules: Vec::new(),
            outlier_rules: Vec::new(),
            quantile: QuantileConfig::default(),
            capping_order: CappingOrder::default(),
            casts: Vec::new(),
            renames: Vec::new(),
            drop_columns: Vec::new(),
            target_partitions: None,
            repartition_seed: 0,
            output_dir: PathBuf::from("output"),
            output_name: None,
            overwrite: false,
            generate_reports: true,
            save_to_disk: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Dataset directory name under `output_dir`.
    pub fn dataset_name(&self) -> &str {
        self.output_name.as_deref().unwrap_or("cleaned_dataset")
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let epsilon = self.quantile.epsilon;
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(ConfigValidationError::InvalidEpsilon(epsilon));
        }

        for rule in &self.outlier_rules {
            check_not_empty("outlier_rules.column", &rule.column)?;
            let ranks = [("lower_rank", rule.lower_rank), ("upper_rank", rule.upper_rank)];
            for (field, value) in ranks {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigValidationError::InvalidRank {
                        field: format!("{}.{field}", rule.column),
                        value,
                    });
                }
            }
            if rule.lower_rank > rule.upper_rank {
                return Err(ConfigValidationError::InvertedRanks {
                    column: rule.column.clone(),
                    lower: rule.lower_rank,
                    upper: rule.upper_rank,
                });
            }
        }

        for rule in &self.text_rules {
            check_not_empty("text_rules.source", &rule.source)?;
            check_not_empty("text_rules.target", &rule.target)?;
            if let Err(e) = Regex::new(&rule.strip_pattern) {
                return Err(ConfigValidationError::InvalidPattern {
                    column: rule.source.clone(),
                    reason: e.to_string(),
                });
            }
        }

        for rule in &self.categorical_rules {
            check_not_empty("categorical_rules.column", &rule.column)?;
        }
        for rule in &self.casts {
            check_not_empty("casts.column", &rule.column)?;
        }
        for rule in &self.renames {
            check_not_empty("renames.from", &rule.from)?;
            check_not_empty("renames.to", &rule.to)?;
        }
        for column in &self.required_columns {
            check_not_empty("required_columns", column)?;
        }

        if self.target_partitions == Some(0) {
            return Err(ConfigValidationError::InvalidPartitionCount(0));
        }

        if let Some(name) = &self.output_name
            && (name.trim().is_empty() || name.contains(['/', '\\']))
        {
            return Err(ConfigValidationError::InvalidOutputName(name.clone()));
        }

        Ok(())
    }
}

fn check_not_empty(field: &str, value: &str) -> Result<(), ConfigValidationError> {
    if value.trim().is_empty() {
        return Err(ConfigValidationError::EmptyColumnName(field.to_string()));
    }
    Ok(())
}

fn default_text_target() -> String {
    DEFAULT_TEXT_TARGET.to_string()
}

fn default_strip_pattern() -> String {
    DEFAULT_STRIP_PATTERN.to_string()
}

fn default_true() -> bool {
    true
}

fn default_lower_rank() -> f64 {
    DEFAULT_LOWER_RANK
}

fn default_upper_rank() -> f64 {
    DEFAULT_UPPER_RANK
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid epsilon: {0} (must be strictly between 0.0 and 1.0)")]
    InvalidEpsilon(f64),

    #[error("Invalid rank for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidRank { field: String, value: f64 },

    #[error("Lower rank {lower} is above upper rank {upper} for column '{column}'")]
    InvertedRanks { column: String, lower: f64, upper: f64 },

    #[error("Invalid strip pattern for column '{column}': {reason}")]
    InvalidPattern { column: String, reason: String },

    #[error("Empty column name in '{0}'")]
    EmptyColumnName(String),

    #[error("Invalid partition count: {0} (must be at least 1)")]
    InvalidPartitionCount(usize),

    #[error("Invalid output name: '{0}'")]
    InvalidOutputName(String),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    remove_duplicates: Option<bool>,
    duplicate_subset: Option<Vec<String>>,
    required_columns: Vec<String>,
    fill_values: BTreeMap<String, FillValue>,
    text_rules: Vec<TextRule>,
    categorical_rules: Vec<CategoricalRule>,
    outlier_rules: Vec<OutlierRule>,
    epsilon: Option<f64>,
    reduction: Option<ReductionStrategy>,
    capping_order: Option<CappingOrder>,
    casts: Vec<CastRule>,
    renames: Vec<RenameRule>,
    drop_columns: Vec<String>,
    target_partitions: Option<usize>,
    repartition_seed: Option<u64>,
    output_dir: Option<PathBuf>,
    output_name: Option<String>,
    overwrite: Option<bool>,
    generate_reports: Option<bool>,
    save_to_disk: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Enable or disable duplicate row removal.
    pub fn remove_duplicates(mut self, remove: bool) -> Self {
        self.remove_duplicates = Some(remove);
        self
    }

    /// Only compare these columns when looking for duplicates.
    pub fn duplicate_subset<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.duplicate_subset = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Drop rows where `column` is null.
    pub fn require_column(mut self, column: impl Into<String>) -> Self {
        self.required_columns.push(column.into());
        self
    }

    /// Replace nulls in `column` with `value`.
    pub fn fill_value(mut self, column: impl Into<String>, value: impl Into<FillValue>) -> Self {
        self.fill_values.insert(column.into(), value.into());
        self
    }

    pub fn text_rule(mut self, rule: TextRule) -> Self {
        self.text_rules.push(rule);
        self
    }

    pub fn categorical_rule(mut self, rule: CategoricalRule) -> Self {
        self.categorical_rules.push(rule);
        self
    }

    pub fn outlier_rule(mut self, rule: OutlierRule) -> Self {
        self.outlier_rules.push(rule);
        self
    }

    /// Set the rank error of the quantile sketches.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Set how partition sketches are merged.
    pub fn reduction(mut self, reduction: ReductionStrategy) -> Self {
        self.reduction = Some(reduction);
        self
    }

    pub fn capping_order(mut self, order: CappingOrder) -> Self {
        self.capping_order = Some(order);
        self
    }

    pub fn cast(mut self, column: impl Into<String>, to: CastType) -> Self {
        self.casts.push(CastRule::new(column, to));
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push(RenameRule {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.drop_columns.push(column.into());
        self
    }

    /// Redistribute rows into `partitions` partitions before writing.
    pub fn target_partitions(mut self, partitions: usize) -> Self {
        self.target_partitions = Some(partitions);
        self
    }

    pub fn repartition_seed(mut self, seed: u64) -> Self {
        self.repartition_seed = Some(seed);
        self
    }

    /// Set the output directory for cleaned data and reports.
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Set the dataset directory name (default "cleaned_dataset").
    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = Some(overwrite);
        self
    }

    /// Enable or disable report generation.
    pub fn generate_reports(mut self, generate: bool) -> Self {
        self.generate_reports = Some(generate);
        self
    }

    /// Enable or disable saving cleaned data to disk.
    ///
    /// When false, the pipeline keeps results in memory only and skips
    /// all file I/O.
    pub fn save_to_disk(mut self, save: bool) -> Self {
        self.save_to_disk = Some(save);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let config = PipelineConfig {
            remove_duplicates: self.remove_duplicates.unwrap_or(true),
            duplicate_subset: self.duplicate_subset,
            required_columns: self.required_columns,
            fill_values: self.fill_values,
            text_rules: self.text_rules,
            categorical_rules: self.categorical_rules,
            outlier_rules: self.outlier_rules,
            quantile: QuantileConfig {
                epsilon: self.epsilon.unwrap_or(DEFAULT_EPSILON),
                reduction: self.reduction.unwrap_or_default(),
            },
            capping_order: self.capping_order.unwrap_or_default(),
            casts: self.casts,
            renames: self.renames,
            drop_columns: self.drop_columns,
            target_partitions: self.target_partitions,
            repartition_seed: self.repartition_seed.unwrap_or(0),
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from("output")),
            output_name: self.output_name,
            overwrite: self.overwrite.unwrap_or(false),
            generate_reports: self.generate_reports.unwrap_or(true),
            save_to_disk: self.save_to_disk.unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }
}
