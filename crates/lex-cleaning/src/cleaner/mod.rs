//! Row and column cleaning stages.
//!
//! This module provides functionality for:
//! - Removing duplicate rows across partitions
//! - Dropping rows with required nulls and filling defaults
//! - Normalizing free-text and categorical columns
//! - Type coercion
//! - Renaming and dropping columns

mod converters;
mod sanitizers;
mod type_corrector;

pub use type_corrector::TypeCoercer;

use crate::config::{CategoricalRule, FillValue, RenameRule, TextRule};
use crate::dataset::{Dataset, Partition};
use crate::error::{CleaningError, Result};
use crate::utils::{
    DtypeCategory, fill_numeric_nulls, fill_string_nulls, get_dtype_category, row_keys,
};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Stateless cleaner for the row and column stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataCleaner;

impl DataCleaner {
    /// Remove rows equal to an earlier row, comparing `subset` (or all columns).
    ///
    /// The first occurrence in partition order is kept, so the result is
    /// deterministic for a given partitioning.
    pub fn remove_duplicates(
        &self,
        dataset: Dataset,
        subset: Option<&[String]>,
    ) -> Result<(Dataset, Vec<String>)> {
        let key_columns: Vec<String> = match subset {
            Some(columns) => {
                dataset.require_columns(columns)?;
                columns.to_vec()
            }
            None => dataset.column_names(),
        };

        info!("Removing duplicate rows...");
        let before = dataset.height();
        let mut seen: HashSet<String> = HashSet::with_capacity(before);
        let mut partitions = Vec::with_capacity(dataset.num_partitions());

        for partition in dataset.into_partitions() {
            let keys = row_keys(partition.frame(), &key_columns)?;
            let mask: Vec<bool> = keys.into_iter().map(|key| seen.insert(key)).collect();

            if mask.iter().all(|keep| *keep) {
                partitions.push(partition);
                continue;
            }
            let index = partition.index();
            let mask = BooleanChunked::from_slice("keep".into(), &mask);
            partitions.push(Partition::new(index, partition.frame().filter(&mask)?));
        }

        let dataset = Dataset::from_partitions(partitions)?;
        let removed = before - dataset.height();

        let mut actions = Vec::new();
        if removed > 0 {
            let pct = (removed as f64 / before as f64) * 100.0;
            actions.push(format!("Removed {} duplicate rows ({:.1}%)", removed, pct));
            debug!("Removed {} duplicate rows", removed);
        } else {
            actions.push("No duplicate rows found".to_string());
        }

        Ok((dataset, actions))
    }

    /// Drop rows with a null in any `required` column, then fill nulls.
    ///
    /// Fill values for columns that do not exist are ignored; a fill whose
    /// type does not fit the column is skipped with a warning.
    pub fn handle_missing_values(
        &self,
        dataset: Dataset,
        required: &[String],
        fills: &BTreeMap<String, FillValue>,
    ) -> Result<(Dataset, Vec<String>)> {
        let mut actions = Vec::new();
        let mut dataset = dataset;

        if !required.is_empty() {
            dataset.require_columns(required)?;
            let before = dataset.height();
            dataset = dataset.map_partitions(|partition| {
                partition.map_frame(|frame| drop_null_rows(frame, required))
            })?;
            let removed = before - dataset.height();
            actions.push(format!(
                "Dropped {} rows with nulls in required columns {:?}",
                removed, required
            ));
        }

        for (column, fill) in fills {
            let Some(dtype) = dataset.column_dtype(column) else {
                debug!("Skipping fill for missing column '{}'", column);
                continue;
            };

            let compatible = matches!(
                (fill, get_dtype_category(&dtype)),
                (FillValue::Number(_), DtypeCategory::Numeric)
                    | (FillValue::Text(_), DtypeCategory::String)
            );
            if !compatible {
                warn!(
                    "Fill value {:?} does not match type {} of column '{}', skipping",
                    fill, dtype, column
                );
                actions.push(format!("Skipped fill for '{}' (type {})", column, dtype));
                continue;
            }

            let nulls: usize = dataset
                .partitions()
                .iter()
                .filter_map(|p| p.frame().column(column).ok())
                .map(|col| col.null_count())
                .sum();
            if nulls == 0 {
                continue;
            }

            dataset = dataset.map_partitions(|partition| {
                partition.map_frame(|frame| fill_column(frame, column, fill))
            })?;
            actions.push(format!("Filled {} nulls in '{}'", nulls, column));
        }

        if actions.is_empty() {
            actions.push("No missing values handled".to_string());
        }
        Ok((dataset, actions))
    }

    /// Apply every text rule, writing each result to its target column.
    pub fn normalize_text(
        &self,
        dataset: Dataset,
        rules: &[TextRule],
    ) -> Result<(Dataset, Vec<String>)> {
        let mut actions = Vec::new();
        let mut dataset = dataset;

        for rule in rules {
            if !dataset.has_column(&rule.source) {
                return Err(CleaningError::ColumnNotFound(rule.source.clone()));
            }
            let normalizer = sanitizers::TextNormalizer::from_rule(rule)?;
            dataset = dataset.map_partitions(|partition| {
                partition.map_frame(|mut frame| {
                    let source = frame.column(&rule.source)?.as_materialized_series().clone();
                    let normalized = normalizer.apply(&source, &rule.target)?;
                    frame.with_column(normalized)?;
                    Ok(frame)
                })
            })?;
            actions.push(format!(
                "Normalized text '{}' into '{}'",
                rule.source, rule.target
            ));
        }

        Ok((dataset, actions))
    }

    /// Trim, lower-case and alias categorical columns in place.
    pub fn normalize_categories(
        &self,
        dataset: Dataset,
        rules: &[CategoricalRule],
    ) -> Result<(Dataset, Vec<String>)> {
        let mut actions = Vec::new();
        let mut dataset = dataset;

        for rule in rules {
            if !dataset.has_column(&rule.column) {
                return Err(CleaningError::ColumnNotFound(rule.column.clone()));
            }
            let aliases = sanitizers::normalized_aliases(&rule.aliases);
            dataset = dataset.map_partitions(|partition| {
                partition.map_frame(|mut frame| {
                    let source = frame.column(&rule.column)?.as_materialized_series().clone();
                    let normalized = sanitizers::normalize_categories(&source, &aliases)?;
                    frame.replace(&rule.column, normalized)?;
                    Ok(frame)
                })
            })?;
            actions.push(format!(
                "Normalized categories in '{}' ({} aliases)",
                rule.column,
                aliases.len()
            ));
        }

        Ok((dataset, actions))
    }

    /// Rename columns, then drop columns.
    ///
    /// Renames of missing columns and drops of missing columns are no-ops.
    pub fn prune_schema(
        &self,
        dataset: Dataset,
        renames: &[RenameRule],
        drops: &[String],
    ) -> Result<(Dataset, Vec<String>)> {
        let mut actions = Vec::new();

        let applied: Vec<&RenameRule> = renames
            .iter()
            .filter(|rule| dataset.has_column(&rule.from))
            .collect();
        for rule in renames.iter().filter(|rule| !dataset.has_column(&rule.from)) {
            debug!("Rename source '{}' not found, ignoring", rule.from);
        }

        let dataset = dataset.map_partitions(|partition| {
            partition.map_frame(|mut frame| {
                for rule in &applied {
                    frame.rename(&rule.from, rule.to.as_str().into())?;
                }
                Ok(frame)
            })
        })?;
        for rule in &applied {
            actions.push(format!("Renamed '{}' to '{}'", rule.from, rule.to));
        }

        let to_drop: Vec<PlSmallStr> = drops
            .iter()
            .filter(|name| dataset.has_column(name))
            .map(|name| name.as_str().into())
            .collect();
        if to_drop.is_empty() {
            return Ok((dataset, actions));
        }

        let dropped = to_drop.len();
        let dataset = dataset.map_partitions(|partition| {
            partition.map_frame(|frame| Ok(frame.drop_many(to_drop.clone())))
        })?;
        actions.push(format!("Dropped {} columns: {:?}", dropped, to_drop));

        Ok((dataset, actions))
    }
}

fn drop_null_rows(frame: DataFrame, required: &[String]) -> Result<DataFrame> {
    let mut keep = vec![true; frame.height()];
    for name in required {
        let nulls = frame.column(name)?.as_materialized_series().is_null();
        for (row, is_null) in nulls.into_iter().enumerate() {
            if is_null == Some(true) {
                keep[row] = false;
            }
        }
    }

    if keep.iter().all(|k| *k) {
        return Ok(frame);
    }
    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    Ok(frame.filter(&mask)?)
}

fn fill_column(mut frame: DataFrame, column: &str, fill: &FillValue) -> Result<DataFrame> {
    let series = frame.column(column)?.as_materialized_series().clone();
    if series.null_count() == 0 {
        return Ok(frame);
    }

    let filled = match fill {
        FillValue::Number(value) => fill_numeric_nulls(&series, *value)?,
        FillValue::Text(value) => fill_string_nulls(&series, value)?,
    };
    frame.replace(column, filled)?;
    Ok(frame)
}
