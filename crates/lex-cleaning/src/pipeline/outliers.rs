//! Outlier capping.
//!
//! Bounds come from the distributed quantile estimate of each rule's column;
//! no partition is ever sorted or gathered in one place. Clamping is then
//! applied to every partition in parallel.

use crate::config::{OutlierRule, QuantileConfig};
use crate::dataset::{Dataset, Partition};
use crate::error::Result;
use crate::quantile::{Bounds, QuantileCoordinator};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Caps numeric columns at their estimated quantile bounds.
#[derive(Debug, Clone, Default)]
pub struct OutlierCapper {
    coordinator: QuantileCoordinator,
}

impl OutlierCapper {
    pub fn new(config: QuantileConfig) -> Self {
        Self {
            coordinator: QuantileCoordinator::new(config),
        }
    }

    /// Apply every rule in order and return the bounds used per column.
    ///
    /// Later rules see the output of earlier ones. Errors from estimation
    /// (`EmptySketch`, `SchemaMismatch`) abort the stage.
    pub fn cap_outliers(
        &self,
        dataset: Dataset,
        rules: &[OutlierRule],
        processing_steps: &mut Vec<String>,
    ) -> Result<(Dataset, BTreeMap<String, Bounds>)> {
        let mut dataset = dataset;
        let mut bounds_by_column = BTreeMap::new();

        for rule in rules {
            let bounds = self.coordinator.estimate_bounds(
                dataset.partitions(),
                &rule.column,
                rule.lower_rank,
                rule.upper_rank,
            )?;
            info!(
                "Bounds for '{}': [{}, {}] (ranks {}/{})",
                rule.column, bounds.lower, bounds.upper, rule.lower_rank, rule.upper_rank
            );

            let output = rule.output_column_name();
            let capped: Vec<(Partition, usize)> = dataset
                .into_partitions()
                .into_par_iter()
                .map(|partition| cap_partition(partition, &rule.column, &output, bounds))
                .collect::<Result<Vec<_>>>()?;

            let total: usize = capped.iter().map(|(_, count)| count).sum();
            dataset = Dataset::from_partitions(capped.into_iter().map(|(p, _)| p).collect())?;

            processing_steps.push(format!(
                "Capped {} values in '{}' to [{}, {}] at ranks {}/{} into '{}'",
                total,
                rule.column,
                bounds.lower,
                bounds.upper,
                rule.lower_rank,
                rule.upper_rank,
                output
            ));
            debug!("Capped {} values in '{}'", total, rule.column);
            bounds_by_column.insert(rule.column.clone(), bounds);
        }

        Ok((dataset, bounds_by_column))
    }
}

/// Clamp one partition's column into `output`, returning how many values moved.
fn cap_partition(
    partition: Partition,
    column: &str,
    output: &str,
    bounds: Bounds,
) -> Result<(Partition, usize)> {
    let values = partition.numeric_column(column)?;
    let outliers = values
        .into_iter()
        .flatten()
        .filter(|v| bounds.is_outlier(*v))
        .count();

    let mut capped = values.apply(|v| v.map(|x| bounds.cap(x))).into_series();
    capped.rename(output.into());

    let partition = partition.map_frame(|mut frame| {
        frame.with_column(capped)?;
        Ok(frame)
    })?;
    Ok((partition, outliers))
}
