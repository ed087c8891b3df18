//! Type coercion stage: applies declared cast rules to every partition.

use super::converters::{cast_series, is_supported};
use crate::config::CastRule;
use crate::dataset::Dataset;
use crate::error::{CleaningError, Result, ResultExt};
use tracing::{debug, info};

/// Applies [`CastRule`]s to a dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCoercer;

impl TypeCoercer {
    /// Cast each rule's column, in rule order.
    ///
    /// A missing column fails with `ColumnNotFound`; a column whose type
    /// cannot be cast to the target fails with `SchemaMismatch`. Individual
    /// values that do not convert become null.
    pub fn coerce(&self, dataset: Dataset, casts: &[CastRule]) -> Result<(Dataset, Vec<String>)> {
        let mut actions = Vec::new();
        let mut dataset = dataset;

        info!("Applying {} cast rules...", casts.len());

        for rule in casts {
            let dtype = dataset
                .column_dtype(&rule.column)
                .ok_or_else(|| CleaningError::ColumnNotFound(rule.column.clone()))?;

            if !is_supported(&dtype, rule.to) {
                return Err(CleaningError::schema_mismatch(
                    &rule.column,
                    0,
                    format!("cannot cast {} to {}", dtype, rule.to.as_str()),
                ));
            }

            let nulls_before = null_count(&dataset, &rule.column);
            dataset = dataset.map_partitions(|partition| {
                partition.map_frame(|mut frame| {
                    let series = frame.column(&rule.column)?.as_materialized_series();
                    let cast = cast_series(series, rule.to)
                        .context(format!("casting '{}' to {}", rule.column, rule.to.as_str()))?;
                    frame.replace(&rule.column, cast)?;
                    Ok(frame)
                })
            })?;
            let introduced = null_count(&dataset, &rule.column).saturating_sub(nulls_before);

            debug!(
                "Cast '{}' from {} to {} ({} values became null)",
                rule.column,
                dtype,
                rule.to.as_str(),
                introduced
            );
            let mut action = format!(
                "Cast '{}' from {} to {}",
                rule.column,
                dtype,
                rule.to.as_str()
            );
            if introduced > 0 {
                action.push_str(&format!(" ({} unparseable values set to null)", introduced));
            }
            actions.push(action);
        }

        Ok((dataset, actions))
    }
}

fn null_count(dataset: &Dataset, column: &str) -> usize {
    dataset
        .partitions()
        .iter()
        .filter_map(|p| p.frame().column(column).ok())
        .map(|col| col.null_count())
        .sum()
}
