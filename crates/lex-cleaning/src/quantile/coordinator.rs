//! Distributed quantile estimation over a partitioned column.
//!
//! One sketch is built per partition in parallel, the partial sketches are
//! merged (pairwise tree or left fold) and every requested rank is answered
//! from the single merged sketch.
//!
//! Merging adds the rank error of both sides, so the configured epsilon is
//! split: partition sketches are built at `epsilon / 2` and the merges spend
//! the other half. A left fold can compress at the full epsilon after every
//! step. A tree gives each of its `depth = ceil(log2(partitions))` rounds an
//! equal share of `epsilon / 2`, which keeps the global sketch within
//! `2 * max(depth, 1) / epsilon + 2` tuples whatever the number of values.

use crate::config::{QuantileConfig, ReductionStrategy};
use crate::dataset::PartitionScanner;
use crate::error::{CleaningError, Result};
use crate::quantile::QuantileSketch;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lower/upper capping bounds for one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    /// Create bounds, rejecting NaN and `lower > upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(CleaningError::InvalidConfig(format!(
                "invalid bounds [{lower}, {upper}]"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Clamp `value` into `[lower, upper]`.
    ///
    /// Values already inside the interval are returned unchanged.
    pub fn cap(&self, value: f64) -> f64 {
        if value < self.lower {
            self.lower
        } else if value > self.upper {
            self.upper
        } else {
            value
        }
    }

    /// Whether `cap` would change `value`.
    pub fn is_outlier(&self, value: f64) -> bool {
        value < self.lower || value > self.upper
    }
}

/// Requested ranks and their estimated values, in ascending rank order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantileEstimates {
    /// Number of non-null values the estimates were computed from.
    pub count: u64,
    pub entries: Vec<(f64, f64)>,
}

impl QuantileEstimates {
    /// Value estimated for `rank`, if it was requested.
    pub fn get(&self, rank: f64) -> Option<f64> {
        self.entries
            .iter()
            .find(|(requested, _)| *requested == rank)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().copied()
    }
}

/// Builds, merges and queries per-partition sketches.
#[derive(Debug, Clone, Default)]
pub struct QuantileCoordinator {
    config: QuantileConfig,
}

impl QuantileCoordinator {
    pub fn new(config: QuantileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QuantileConfig {
        &self.config
    }

    /// Estimate `ranks` of `column` across all partitions.
    ///
    /// Nulls and NaN are skipped. Partitions without values contribute an
    /// empty sketch; if every partition is empty the result is `EmptySketch`.
    /// A partition without the column, or with a non-numeric one, fails the
    /// whole estimate with `SchemaMismatch`.
    pub fn estimate<P: PartitionScanner>(
        &self,
        partitions: &[P],
        column: &str,
        ranks: &[f64],
    ) -> Result<QuantileEstimates> {
        for &rank in ranks {
            if !(0.0..=1.0).contains(&rank) {
                return Err(CleaningError::InvalidRank(rank));
            }
        }

        let mut ranks = ranks.to_vec();
        ranks.sort_by(f64::total_cmp);
        ranks.dedup();
        if ranks.is_empty() {
            return Ok(QuantileEstimates::default());
        }

        let sketch = self.global_sketch(partitions, column)?;
        if sketch.is_empty() {
            return Err(CleaningError::EmptySketch);
        }

        let values = sketch.query_many(&ranks)?;
        Ok(QuantileEstimates {
            count: sketch.count(),
            entries: ranks.into_iter().zip(values).collect(),
        })
    }

    /// Estimate the `[lower_rank, upper_rank]` capping interval of `column`.
    pub fn estimate_bounds<P: PartitionScanner>(
        &self,
        partitions: &[P],
        column: &str,
        lower_rank: f64,
        upper_rank: f64,
    ) -> Result<Bounds> {
        if lower_rank > upper_rank {
            return Err(CleaningError::InvalidConfig(format!(
                "lower rank {lower_rank} is above upper rank {upper_rank} for '{column}'"
            )));
        }

        let estimates = self.estimate(partitions, column, &[lower_rank, upper_rank])?;
        let lower = estimates.get(lower_rank).ok_or(CleaningError::EmptySketch)?;
        let upper = estimates.get(upper_rank).ok_or(CleaningError::EmptySketch)?;
        Bounds::new(lower, upper)
    }

    /// Build and merge the per-partition sketches of `column`.
    pub fn global_sketch<P: PartitionScanner>(
        &self,
        partitions: &[P],
        column: &str,
    ) -> Result<QuantileSketch> {
        let sketches = partitions
            .par_iter()
            .map(|partition| self.partition_sketch(partition, column))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Merging {} partition sketches for '{}' ({:?})",
            sketches.len(),
            column,
            self.config.reduction
        );

        let epsilon = self.config.epsilon;
        let merged = match self.config.reduction {
            ReductionStrategy::Tree => tree_reduce(sketches, epsilon),
            ReductionStrategy::Sequential => sequential_reduce(sketches, epsilon),
        };

        let sketch = match merged {
            Some(mut sketch) => {
                sketch.relax(epsilon);
                sketch
            }
            None => QuantileSketch::new(epsilon)?,
        };
        debug!(
            "Global sketch for '{}': {} values in {} tuples",
            column,
            sketch.count(),
            sketch.tuple_count()
        );
        Ok(sketch)
    }

    /// Sketch of one partition's non-null values, inserted in row order.
    ///
    /// Built at half the configured epsilon; the rest is left for merging.
    pub fn partition_sketch<P: PartitionScanner>(
        &self,
        partition: &P,
        column: &str,
    ) -> Result<QuantileSketch> {
        let mut sketch = QuantileSketch::new(self.config.epsilon / 2.0)?
            .with_origin(partition.partition_index());

        for value in partition.scan(column)? {
            if let Some(value) = value
                && !value.is_nan()
            {
                sketch.insert(value)?;
            }
        }

        sketch.flush();
        Ok(sketch)
    }
}

/// Merge adjacent pairs level by level until one sketch is left.
///
/// Round `k` of `depth` compresses at `epsilon * (1 + k / depth) / 2`, so the
/// last round ends at `epsilon`.
fn tree_reduce(sketches: Vec<QuantileSketch>, epsilon: f64) -> Option<QuantileSketch> {
    let depth = sketches.len().next_power_of_two().trailing_zeros();
    let mut level = sketches;
    let mut round = 0u32;
    while level.len() > 1 {
        round += 1;
        let budget = epsilon * (0.5 + 0.5 * f64::from(round) / f64::from(depth));
        level = level
            .into_par_iter()
            .chunks(2)
            .filter_map(|pair| {
                pair.into_iter().reduce(|mut left, right| {
                    left.absorb(right);
                    left.relax(budget);
                    left
                })
            })
            .collect();
    }
    level.pop()
}

fn sequential_reduce(sketches: Vec<QuantileSketch>, epsilon: f64) -> Option<QuantileSketch> {
    sketches.into_iter().reduce(|mut acc, sketch| {
        acc.absorb(sketch);
        acc.relax(epsilon);
        acc
    })
}
