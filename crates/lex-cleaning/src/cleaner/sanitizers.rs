//! Value-level normalization for text and categorical columns.

use crate::config::{DEFAULT_STRIP_PATTERN, TextRule};
use crate::error::{CleaningError, Result};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;

static DEFAULT_STRIP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_STRIP_PATTERN).expect("default strip pattern is valid"));

/// Compiled form of a [`TextRule`].
#[derive(Debug, Clone)]
pub(crate) struct TextNormalizer {
    pattern: Regex,
    lowercase: bool,
    trim: bool,
}

impl TextNormalizer {
    pub(crate) fn from_rule(rule: &TextRule) -> Result<Self> {
        let pattern = if rule.strip_pattern == DEFAULT_STRIP_PATTERN {
            DEFAULT_STRIP_REGEX.clone()
        } else {
            Regex::new(&rule.strip_pattern).map_err(|e| {
                CleaningError::InvalidConfig(format!(
                    "strip pattern for '{}': {}",
                    rule.source, e
                ))
            })?
        };

        Ok(Self {
            pattern,
            lowercase: rule.lowercase,
            trim: rule.trim,
        })
    }

    /// Normalize one value: strip pattern matches, lower-case, then trim.
    pub(crate) fn normalize(&self, value: &str) -> String {
        let stripped = self.pattern.replace_all(value, "");
        let folded = if self.lowercase {
            stripped.to_lowercase()
        } else {
            stripped.into_owned()
        };
        if self.trim {
            folded.trim().to_string()
        } else {
            folded
        }
    }

    /// Normalize a whole column into a new series named `target`.
    ///
    /// Non-string columns are cast to string first; nulls stay null.
    pub(crate) fn apply(&self, series: &Series, target: &str) -> PolarsResult<Series> {
        let as_text = series.cast(&DataType::String)?;
        let values: Vec<Option<String>> = as_text
            .str()?
            .into_iter()
            .map(|opt| opt.map(|v| self.normalize(v)))
            .collect();
        Ok(Series::new(target.into(), values))
    }
}

/// Canonical form of a category: trimmed and lower-cased.
pub(crate) fn normalize_category(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Alias map with its keys normalized like the values they match.
pub(crate) fn normalized_aliases(aliases: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    aliases
        .iter()
        .map(|(from, to)| (normalize_category(from), to.clone()))
        .collect()
}

/// Normalize a categorical column in place, mapping aliases afterwards.
pub(crate) fn normalize_categories(
    series: &Series,
    aliases: &BTreeMap<String, String>,
) -> PolarsResult<Series> {
    let as_text = series.cast(&DataType::String)?;
    let values: Vec<Option<String>> = as_text
        .str()?
        .into_iter()
        .map(|opt| {
            opt.map(|v| {
                let normalized = normalize_category(v);
                aliases.get(&normalized).cloned().unwrap_or(normalized)
            })
        })
        .collect();
    Ok(Series::new(series.name().clone(), values))
}
