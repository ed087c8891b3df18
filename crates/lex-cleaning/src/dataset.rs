//! Partitioned tabular data.
//!
//! A [`Dataset`] is an ordered list of [`Partition`]s that share one schema.
//! Stages transform partitions independently (in parallel where possible);
//! only deduplication and quantile estimation look across partitions.

use crate::error::{CleaningError, Result};
use crate::utils::is_numeric_dtype;
use polars::prelude::*;
use rayon::prelude::*;

/// Read access to one partition's numeric column.
///
/// This is the seam the quantile coordinator consumes; anything that can
/// yield a column as `Option<f64>` in row order can be summarized.
pub trait PartitionScanner: Sync {
    /// Position of this partition in its dataset.
    fn partition_index(&self) -> usize;

    /// Values of `column` in row order, nulls as `None`.
    ///
    /// Fails with `SchemaMismatch` if the column is missing or not numeric.
    fn scan<'a>(&'a self, column: &str) -> Result<Box<dyn Iterator<Item = Option<f64>> + 'a>>;
}

/// One horizontal slice of a dataset.
#[derive(Debug, Clone)]
pub struct Partition {
    index: usize,
    frame: DataFrame,
}

impl Partition {
    pub fn new(index: usize, frame: DataFrame) -> Self {
        Self { index, frame }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Replace the frame, keeping the index.
    pub fn map_frame<F>(self, f: F) -> Result<Partition>
    where
        F: FnOnce(DataFrame) -> Result<DataFrame>,
    {
        let index = self.index;
        Ok(Partition::new(index, f(self.frame)?))
    }

    /// `column` cast to Float64, after checking it is numeric.
    pub fn numeric_column(&self, column: &str) -> Result<Float64Chunked> {
        let col = self.frame.column(column).map_err(|_| {
            CleaningError::schema_mismatch(column, self.index, "column not present")
        })?;

        if !is_numeric_dtype(col.dtype()) {
            return Err(CleaningError::schema_mismatch(
                column,
                self.index,
                format!("expected a numeric column, found {}", col.dtype()),
            ));
        }

        let as_float = col.as_materialized_series().cast(&DataType::Float64)?;
        Ok(as_float.f64()?.clone())
    }
}

impl PartitionScanner for Partition {
    fn partition_index(&self) -> usize {
        self.index
    }

    fn scan<'a>(&'a self, column: &str) -> Result<Box<dyn Iterator<Item = Option<f64>> + 'a>> {
        let values = self.numeric_column(column)?;
        Ok(Box::new((0..values.len()).map(move |idx| values.get(idx))))
    }
}

/// Ordered partitions sharing one schema.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    partitions: Vec<Partition>,
}

impl Dataset {
    /// Build a dataset from frames, numbering partitions in order.
    pub fn new(frames: Vec<DataFrame>) -> Result<Self> {
        let partitions = frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| Partition::new(index, frame))
            .collect();
        Self::from_partitions(partitions)
    }

    /// Build a dataset from partitions, renumbering them by position.
    ///
    /// Every partition must have the same column names and types.
    pub fn from_partitions(partitions: Vec<Partition>) -> Result<Self> {
        if let Some((first, rest)) = partitions.split_first() {
            let expected = schema_of(first.frame());
            for partition in rest {
                let actual = schema_of(partition.frame());
                if actual != expected {
                    return Err(CleaningError::schema_mismatch(
                        describe_difference(&expected, &actual),
                        partition.index(),
                        "partition schema differs from partition 0",
                    ));
                }
            }
        }

        let partitions = partitions
            .into_iter()
            .enumerate()
            .map(|(index, partition)| Partition::new(index, partition.into_frame()))
            .collect();
        Ok(Self { partitions })
    }

    /// Split one frame into `partitions` contiguous slices of near-equal size.
    pub fn from_frame(frame: DataFrame, partitions: usize) -> Result<Self> {
        if partitions == 0 {
            return Err(CleaningError::InvalidConfig(
                "partition count must be at least 1".to_string(),
            ));
        }

        let height = frame.height();
        let count = partitions.min(height.max(1));
        let chunk = height.div_ceil(count).max(1);

        let frames = (0..count)
            .map(|idx| {
                let offset = (idx * chunk).min(height);
                let len = chunk.min(height - offset);
                frame.slice(offset as i64, len)
            })
            .collect();
        Self::new(frames)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<Partition> {
        self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total rows across partitions.
    pub fn height(&self) -> usize {
        self.partitions.iter().map(Partition::height).sum()
    }

    pub fn width(&self) -> usize {
        self.partitions.first().map_or(0, |p| p.frame().width())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.partitions
            .first()
            .map(|p| {
                p.frame()
                    .get_column_names()
                    .into_iter()
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.partitions
            .first()
            .is_some_and(|p| p.frame().column(name).is_ok())
    }

    /// Data type of `name`, if the column exists.
    pub fn column_dtype(&self, name: &str) -> Option<DataType> {
        self.partitions
            .first()
            .and_then(|p| p.frame().column(name).ok())
            .map(|col| col.dtype().clone())
    }

    /// Fail with `ColumnNotFound` unless every name is a column.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for name in names {
            if !self.has_column(name) {
                return Err(CleaningError::ColumnNotFound(name.clone()));
            }
        }
        Ok(())
    }

    /// Apply `f` to every partition in parallel, preserving order.
    pub fn map_partitions<F>(self, f: F) -> Result<Dataset>
    where
        F: Fn(Partition) -> Result<Partition> + Send + Sync,
    {
        let partitions = self
            .partitions
            .into_par_iter()
            .map(f)
            .collect::<Result<Vec<_>>>()?;
        Self::from_partitions(partitions)
    }

    /// Concatenate all partitions into one frame, in partition order.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut iter = self.partitions.iter();
        let Some(first) = iter.next() else {
            return Ok(DataFrame::empty());
        };

        let mut frame = first.frame().clone();
        for partition in iter {
            frame.vstack_mut(partition.frame())?;
        }
        Ok(frame)
    }
}

fn schema_of(frame: &DataFrame) -> Vec<(String, DataType)> {
    frame
        .get_columns()
        .iter()
        .map(|col| (col.name().to_string(), col.dtype().clone()))
        .collect()
}

/// Name of the first column that differs, for error messages.
fn describe_difference(expected: &[(String, DataType)], actual: &[(String, DataType)]) -> String {
    expected
        .iter()
        .zip(actual)
        .find(|(e, a)| e != a)
        .map(|(e, _)| e.0.clone())
        .or_else(|| {
            let longer = if expected.len() > actual.len() { expected } else { actual };
            longer.get(expected.len().min(actual.len())).map(|c| c.0.clone())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_frame() -> DataFrame {
        df!(
            "id" => &[1i64, 2, 3, 4, 5, 6, 7],
            "price" => &[Some(1.5), None, Some(3.0), Some(4.0), Some(5.0), Some(6.0), Some(7.0)],
            "name" => &["a", "b", "c", "d", "e", "f", "g"]
        )
        .unwrap()
    }

    #[test]
    fn test_from_frame_splits_contiguously() {
        let dataset = Dataset::from_frame(sample_frame(), 3).unwrap();
        assert_eq!(dataset.num_partitions(), 3);
        let heights: Vec<usize> = dataset.partitions().iter().map(Partition::height).collect();
        assert_eq!(heights, vec![3, 3, 1]);
        assert_eq!(dataset.height(), 7);
        assert_eq!(dataset.to_frame().unwrap(), sample_frame());
    }

    #[test]
    fn test_from_frame_caps_partitions_at_height() {
        let dataset = Dataset::from_frame(sample_frame(), 20).unwrap();
        assert_eq!(dataset.num_partitions(), 7);
    }

    #[test]
    fn test_from_frame_empty_frame() {
        let empty = sample_frame().slice(0, 0);
        let dataset = Dataset::from_frame(empty, 4).unwrap();
        assert_eq!(dataset.num_partitions(), 1);
        assert_eq!(dataset.height(), 0);
        assert_eq!(dataset.width(), 3);
    }

    #[test]
    fn test_new_rejects_mismatched_schema() {
        let a = df!("x" => &[1i64]).unwrap();
        let b = df!("x" => &["1"]).unwrap();
        let result = Dataset::new(vec![a, b]);
        assert!(matches!(result, Err(CleaningError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_scan_yields_floats_with_nulls() {
        let dataset = Dataset::from_frame(sample_frame(), 1).unwrap();
        let values: Vec<Option<f64>> = dataset.partitions()[0].scan("price").unwrap().collect();
        assert_eq!(values[0], Some(1.5));
        assert_eq!(values[1], None);
        assert_eq!(values.len(), 7);

        let ids: Vec<Option<f64>> = dataset.partitions()[0].scan("id").unwrap().collect();
        assert_eq!(ids[6], Some(7.0));
    }

    #[test]
    fn test_scan_rejects_missing_and_text_columns() {
        let dataset = Dataset::from_frame(sample_frame(), 1).unwrap();
        let partition = &dataset.partitions()[0];
        assert!(matches!(
            partition.scan("missing"),
            Err(CleaningError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            partition.scan("name"),
            Err(CleaningError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_map_partitions_preserves_order() {
        let dataset = Dataset::from_frame(sample_frame(), 3).unwrap();
        let mapped = dataset
            .map_partitions(|p| p.map_frame(|frame| Ok(frame.head(Some(1)))))
            .unwrap();
        let ids: Vec<Option<i64>> = mapped
            .to_frame()
            .unwrap()
            .column("id")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(ids, vec![Some(1), Some(4), Some(7)]);
    }

    #[test]
    fn test_column_helpers() {
        let dataset = Dataset::from_frame(sample_frame(), 2).unwrap();
        assert!(dataset.has_column("price"));
        assert!(!dataset.has_column("missing"));
        assert_eq!(dataset.column_dtype("id"), Some(DataType::Int64));
        assert_eq!(dataset.column_names(), vec!["id", "price", "name"]);
        assert!(matches!(
            dataset.require_columns(&["nope".to_string()]),
            Err(CleaningError::ColumnNotFound(_))
        ));
    }
}
