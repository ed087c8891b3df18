//! Round-robin repartitioning.
//!
//! Rows of each source partition are dealt to the target partitions in turn,
//! starting at a seeded offset per source partition so small partitions do
//! not all land in the first target. The same seed and input always produce
//! the same layout.

use crate::dataset::{Dataset, Partition};
use crate::error::{CleaningError, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Redistributes a dataset into a fixed number of partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Repartitioner {
    seed: u64,
}

impl Repartitioner {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Redistribute `dataset` into `target` partitions.
    ///
    /// Row order inside each source partition is preserved within every
    /// target partition. Targets may end up empty when there are fewer rows
    /// than partitions.
    pub fn repartition(&self, dataset: Dataset, target: usize) -> Result<(Dataset, Vec<String>)> {
        if target == 0 {
            return Err(CleaningError::InvalidConfig(
                "target partition count must be at least 1".to_string(),
            ));
        }

        let before = dataset.num_partitions();
        let sources = dataset.into_partitions();
        let Some(template) = sources.first().map(|p| p.frame().slice(0, 0)) else {
            return Ok((Dataset::default(), vec!["Nothing to repartition".to_string()]));
        };

        let mut pieces: Vec<Vec<DataFrame>> = vec![Vec::new(); target];
        for source in &sources {
            let start = self.start_offset(source.index(), target);
            let mut rows: Vec<Vec<IdxSize>> = vec![Vec::new(); target];
            for row in 0..source.height() {
                rows[(start + row) % target].push(row as IdxSize);
            }

            for (slot, indices) in rows.into_iter().enumerate() {
                if indices.is_empty() {
                    continue;
                }
                let indices = IdxCa::from_vec("rows".into(), indices);
                pieces[slot].push(source.frame().take(&indices)?);
            }
        }

        let partitions = pieces
            .into_iter()
            .enumerate()
            .map(|(index, frames)| {
                let mut frame = template.clone();
                for piece in &frames {
                    frame.vstack_mut(piece)?;
                }
                Ok(Partition::new(index, frame))
            })
            .collect::<Result<Vec<_>>>()?;

        let dataset = Dataset::from_partitions(partitions)?;
        debug!("Repartitioned {} -> {} partitions", before, target);
        Ok((
            dataset,
            vec![format!("Repartitioned {} partitions into {}", before, target)],
        ))
    }

    /// First target slot for rows of source partition `index`.
    fn start_offset(&self, index: usize, target: usize) -> usize {
        let mixed = (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(self.seed ^ mixed);
        rng.gen_range(0..target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(dataset: &Dataset) -> Vec<i64> {
        let mut ids: Vec<i64> = dataset
            .to_frame()
            .unwrap()
            .column("id")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn dataset(rows: i64, partitions: usize) -> Dataset {
        let values: Vec<i64> = (0..rows).collect();
        Dataset::from_frame(df!("id" => &values).unwrap(), partitions).unwrap()
    }

    #[test]
    fn test_repartition_preserves_rows() {
        let (result, _) = Repartitioner::new(7).repartition(dataset(1_000, 3), 10).unwrap();
        assert_eq!(result.num_partitions(), 10);
        assert_eq!(ids(&result), (0..1_000).collect::<Vec<_>>());

        // round-robin keeps partitions balanced
        for partition in result.partitions() {
            assert!((99..=102).contains(&partition.height()), "{}", partition.height());
        }
    }

    #[test]
    fn test_repartition_is_deterministic() {
        let (a, _) = Repartitioner::new(42).repartition(dataset(50, 4), 3).unwrap();
        let (b, _) = Repartitioner::new(42).repartition(dataset(50, 4), 3).unwrap();
        assert_eq!(a.to_frame().unwrap(), b.to_frame().unwrap());
    }

    #[test]
    fn test_repartition_more_partitions_than_rows() {
        let (result, _) = Repartitioner::default().repartition(dataset(3, 1), 8).unwrap();
        assert_eq!(result.num_partitions(), 8);
        assert_eq!(result.height(), 3);
        assert_eq!(result.width(), 1);
    }

    #[test]
    fn test_repartition_zero_target() {
        let result = Repartitioner::default().repartition(dataset(3, 1), 0);
        assert!(matches!(result, Err(CleaningError::InvalidConfig(_))));
    }
}
