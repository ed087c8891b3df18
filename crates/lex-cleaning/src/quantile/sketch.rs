//! Bounded-memory quantile summary for a single numeric column.
//!
//! The summary keeps one tuple per retained value. Instead of the classic
//! `(g, delta)` pair each tuple stores two absolute rank bounds:
//!
//! - `first_max`: an upper bound on the 1-based position of the value's first
//!   occurrence in the sorted multiset,
//! - `last_min`: a lower bound on the position of its last occurrence.
//!
//! With `N` values ingested and `e = floor(epsilon * N)`, the summary keeps
//!
//! ```text
//! first_max(next) - last_min(prev) <= 2e + 1     for consecutive tuples
//! first_max(min) == 1, last_min(max) == N
//! ```
//!
//! which guarantees that every target position `R` in `1..=N` has a tuple with
//! `first_max - e <= R <= last_min + e`, i.e. a value whose true rank is within
//! `epsilon` of the request. Removing a tuple never invalidates the bounds of
//! the remaining ones, so compression is a pure filtering pass.
//!
//! Inserted values are staged in a small buffer; a full buffer is sorted,
//! turned into an exact summary and merged into the retained tuples with the
//! same routine used to combine partition sketches.

use crate::error::{CleaningError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Default rank error used when none is configured.
pub const DEFAULT_EPSILON: f64 = 0.01;

/// Smallest insertion buffer, regardless of epsilon.
const MIN_BUFFER_CAPACITY: usize = 256;

/// Largest insertion buffer, regardless of epsilon.
const MAX_BUFFER_CAPACITY: usize = 65_536;

/// One retained value and its rank bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct SummaryTuple {
    pub(crate) value: f64,
    /// Ingested values accounted to this tuple (values in `(prev, value]`).
    pub(crate) weight: u64,
    pub(crate) first_max: u64,
    pub(crate) last_min: u64,
    /// Lowest partition index that contributed this value.
    pub(crate) origin: u32,
}

/// Mergeable approximate quantile sketch with rank error `epsilon`.
///
/// # Example
///
/// ```rust
/// use lex_cleaning::quantile::QuantileSketch;
///
/// let mut sketch = QuantileSketch::new(0.01)?;
/// for value in 1..=100 {
///     sketch.insert(value as f64)?;
/// }
/// assert_eq!(sketch.query(0.5)?, 50.0);
/// # Ok::<(), lex_cleaning::CleaningError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileSketch {
    epsilon: f64,
    origin: u32,
    /// Values folded into `tuples` (excludes the buffer).
    count: u64,
    pub(crate) tuples: Vec<SummaryTuple>,
    buffer: Vec<f64>,
    buffer_capacity: usize,
    compress_threshold: usize,
}

static_assertions::assert_impl_all!(QuantileSketch: Send, Sync);

impl QuantileSketch {
    /// Create an empty sketch with the given rank error.
    ///
    /// Returns `InvalidConfig` unless `0 < epsilon < 1`.
    pub fn new(epsilon: f64) -> Result<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(CleaningError::InvalidConfig(format!(
                "epsilon must be in (0, 1), got {epsilon}"
            )));
        }

        let compress_threshold = compress_threshold_for(epsilon);
        Ok(Self {
            epsilon,
            origin: 0,
            count: 0,
            tuples: Vec::new(),
            buffer: Vec::new(),
            buffer_capacity: compress_threshold.clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY),
            compress_threshold,
        })
    }

    /// Tag the sketch with the partition it summarizes.
    ///
    /// The origin breaks ties between equal values when sketches are merged.
    pub fn with_origin(mut self, partition_index: usize) -> Self {
        self.origin = u32::try_from(partition_index).unwrap_or(u32::MAX);
        for tuple in &mut self.tuples {
            tuple.origin = self.origin;
        }
        self
    }

    /// Configured rank error.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Partition index this sketch was built from (lowest one after merges).
    pub fn origin(&self) -> usize {
        self.origin as usize
    }

    /// Total number of values inserted.
    pub fn count(&self) -> u64 {
        self.count + self.buffer.len() as u64
    }

    /// Whether no value was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Number of retained summary tuples (buffered values not included).
    pub fn tuple_count(&self) -> usize {
        self.tuples.len()
    }

    /// Tuple count above which compression runs.
    pub fn compress_threshold(&self) -> usize {
        self.compress_threshold
    }

    /// Insert one value.
    ///
    /// NaN is rejected with `InvalidValue`; nulls must be filtered by the
    /// caller. `-0.0` is stored as `0.0`.
    pub fn insert(&mut self, value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(CleaningError::InvalidValue(value));
        }

        // folds -0.0 into 0.0 so both land in the same tuple
        let value = if value == 0.0 { 0.0 } else { value };
        self.buffer.push(value);

        if self.buffer.len() >= self.buffer_capacity {
            self.flush();
        }
        Ok(())
    }

    /// Fold buffered values into the summary.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        self.buffer.sort_unstable_by(f64::total_cmp);
        let batch = exact_tuples(&self.buffer, self.origin);
        let batch_count = self.buffer.len() as u64;
        self.buffer.clear();

        self.tuples = merge_tuples(&self.tuples, self.count, &batch, batch_count);
        self.count += batch_count;
        self.maybe_compress();
    }

    /// Value whose rank is within `epsilon` of `rank`.
    pub fn query(&self, rank: f64) -> Result<f64> {
        validate_rank(rank)?;
        self.settled().query_settled(rank)
    }

    /// Answer several ranks against one settled view of the sketch.
    ///
    /// Answers are returned in the order of `ranks` and are monotone:
    /// a higher rank never yields a lower value.
    pub fn query_many(&self, ranks: &[f64]) -> Result<Vec<f64>> {
        for &rank in ranks {
            validate_rank(rank)?;
        }
        let settled = self.settled();
        ranks
            .iter()
            .map(|&rank| settled.query_settled(rank))
            .collect()
    }

    /// Sketch of the union of both inputs.
    ///
    /// Commutative; merging with an empty sketch returns the other side.
    /// Merging a sketch with itself summarizes the doubled multiset.
    pub fn merge(&self, other: &QuantileSketch) -> QuantileSketch {
        let mut merged = self.clone();
        merged.absorb(other.clone());
        merged
    }

    /// Merge `other` into this sketch in place.
    ///
    /// An empty side contributes nothing, not even its epsilon or origin.
    pub fn absorb(&mut self, other: QuantileSketch) {
        let mut other = other;
        self.flush();
        other.flush();

        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other;
            return;
        }

        self.tuples = merge_tuples(&self.tuples, self.count, &other.tuples, other.count);
        self.count += other.count;
        self.origin = self.origin.min(other.origin);
        if other.epsilon > self.epsilon {
            self.epsilon = other.epsilon;
            self.compress_threshold = compress_threshold_for(self.epsilon);
            self.buffer_capacity = self
                .compress_threshold
                .clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY);
        }
        self.maybe_compress();
    }

    /// Raise the rank error to `epsilon` and compress into the extra room.
    ///
    /// Summaries built at a tighter epsilon leave slack that merges can
    /// spend; an `epsilon` at or below the current one is ignored.
    pub fn relax(&mut self, epsilon: f64) {
        if !(epsilon > self.epsilon && epsilon < 1.0) {
            return;
        }

        self.flush();
        self.epsilon = epsilon;
        self.compress_threshold = compress_threshold_for(epsilon);
        self.buffer_capacity = self
            .compress_threshold
            .clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY);
        self.maybe_compress();
    }

    /// Borrow the sketch if nothing is buffered, otherwise flush a copy.
    fn settled(&self) -> Cow<'_, QuantileSketch> {
        if self.buffer.is_empty() {
            Cow::Borrowed(self)
        } else {
            let mut copy = self.clone();
            copy.flush();
            Cow::Owned(copy)
        }
    }

    fn query_settled(&self, rank: f64) -> Result<f64> {
        if self.count == 0 {
            return Err(CleaningError::EmptySketch);
        }

        let target = ((rank * self.count as f64).ceil() as u64).clamp(1, self.count);

        // Smallest rank error wins; ties go to the lowest value.
        let mut best: Option<(u64, f64)> = None;
        for tuple in &self.tuples {
            let error = tuple
                .first_max
                .saturating_sub(target)
                .max(target.saturating_sub(tuple.last_min));
            if best.is_none_or(|(best_error, _)| error < best_error) {
                best = Some((error, tuple.value));
            }
            if error == 0 {
                break;
            }
        }

        best.map(|(_, value)| value)
            .ok_or(CleaningError::EmptySketch)
    }

    /// `floor(epsilon * N)`, the rank slack allowed on each side of a target.
    pub(crate) fn rank_slack(&self) -> u64 {
        (self.epsilon * self.count as f64).floor() as u64
    }

    fn maybe_compress(&mut self) {
        if self.tuples.len() > self.compress_threshold {
            self.compress();
        }
    }

    /// Drop interior tuples whose neighbours stay within the error budget.
    ///
    /// The minimum and maximum are always kept. A dropped tuple's weight
    /// moves to the next retained tuple.
    pub(crate) fn compress(&mut self) {
        if self.tuples.len() <= 2 {
            return;
        }

        let limit = 2 * self.rank_slack() + 1;
        let last = self.tuples.len() - 1;
        let mut kept = Vec::with_capacity(self.compress_threshold.min(self.tuples.len()));
        kept.push(self.tuples[0]);

        let mut prev_last_min = self.tuples[0].last_min;
        let mut carried = 0u64;
        for idx in 1..last {
            let candidate = self.tuples[idx];
            let next_first_max = self.tuples[idx + 1].first_max;
            if next_first_max.saturating_sub(prev_last_min) <= limit {
                carried += candidate.weight;
            } else {
                kept.push(SummaryTuple {
                    weight: candidate.weight + carried,
                    ..candidate
                });
                carried = 0;
                prev_last_min = candidate.last_min;
            }
        }

        let tail = self.tuples[last];
        kept.push(SummaryTuple {
            weight: tail.weight + carried,
            ..tail
        });
        self.tuples = kept;
    }
}

fn compress_threshold_for(epsilon: f64) -> usize {
    2 * ((1.0 / epsilon).ceil() as usize).max(1)
}

fn validate_rank(rank: f64) -> Result<()> {
    if (0.0..=1.0).contains(&rank) {
        Ok(())
    } else {
        Err(CleaningError::InvalidRank(rank))
    }
}

/// Exact summary of an already sorted run of values.
fn exact_tuples(sorted: &[f64], origin: u32) -> Vec<SummaryTuple> {
    let mut tuples = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let value = sorted[start];
        let mut end = start + 1;
        while end < sorted.len() && sorted[end] == value {
            end += 1;
        }
        tuples.push(SummaryTuple {
            value,
            weight: (end - start) as u64,
            first_max: start as u64 + 1,
            last_min: end as u64,
            origin,
        });
        start = end;
    }
    tuples
}

/// Combine two summaries of disjoint multisets.
///
/// Tuples are ordered by value, then origin. Each side adds to a tuple of
/// the other side the `last_min` of its greatest tuple below the value and
/// `first_max - 1` of its smallest tuple above it (its full count when there
/// is none). Equal values collapse into one tuple.
pub(crate) fn merge_tuples(
    left: &[SummaryTuple],
    left_count: u64,
    right: &[SummaryTuple],
    right_count: u64,
) -> Vec<SummaryTuple> {
    if right.is_empty() {
        return left.to_vec();
    }
    if left.is_empty() {
        return right.to_vec();
    }

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);

    while i < left.len() || j < right.len() {
        let ordering = match (left.get(i), right.get(j)) {
            (Some(l), Some(r)) => l.value.total_cmp(&r.value),
            (Some(_), None) => Ordering::Less,
            _ => Ordering::Greater,
        };

        match ordering {
            Ordering::Less => {
                merged.push(shifted(&left[i], right, j, right_count));
                i += 1;
            }
            Ordering::Greater => {
                merged.push(shifted(&right[j], left, i, left_count));
                j += 1;
            }
            Ordering::Equal => {
                let (l, r) = (&left[i], &right[j]);
                merged.push(SummaryTuple {
                    value: l.value,
                    weight: l.weight + r.weight,
                    first_max: l.first_max + r.first_max - 1,
                    last_min: l.last_min + r.last_min,
                    origin: l.origin.min(r.origin),
                });
                i += 1;
                j += 1;
            }
        }
    }

    merged
}

/// Re-rank `tuple` against the other side, whose first tuple above it is at
/// `next` (everything before `next` is strictly smaller).
fn shifted(
    tuple: &SummaryTuple,
    other: &[SummaryTuple],
    next: usize,
    other_count: u64,
) -> SummaryTuple {
    let below = if next == 0 { 0 } else { other[next - 1].last_min };
    let above = other
        .get(next)
        .map_or(other_count, |succ| succ.first_max - 1);

    SummaryTuple {
        first_max: tuple.first_max + above,
        last_min: tuple.last_min + below,
        ..*tuple
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sketch_of(epsilon: f64, values: impl IntoIterator<Item = f64>) -> QuantileSketch {
        let mut sketch = QuantileSketch::new(epsilon).unwrap();
        for value in values {
            sketch.insert(value).unwrap();
        }
        sketch.flush();
        sketch
    }

    /// Positions `[first, last]` (1-based) that `value` occupies in `sorted`.
    fn true_positions(sorted: &[f64], value: f64) -> (u64, u64) {
        let below = sorted.iter().filter(|v| **v < value).count() as u64;
        let up_to = sorted.iter().filter(|v| **v <= value).count() as u64;
        (below + 1, up_to)
    }

    #[test]
    fn test_new_rejects_out_of_range_epsilon() {
        for epsilon in [0.0, 1.0, -0.5, 2.0, f64::NAN] {
            assert!(matches!(
                QuantileSketch::new(epsilon),
                Err(CleaningError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_insert_rejects_nan() {
        let mut sketch = QuantileSketch::new(0.01).unwrap();
        assert!(matches!(
            sketch.insert(f64::NAN),
            Err(CleaningError::InvalidValue(_))
        ));
        assert!(sketch.is_empty());
    }

    #[test]
    fn test_query_empty_sketch() {
        let sketch = QuantileSketch::new(0.01).unwrap();
        assert!(matches!(sketch.query(0.5), Err(CleaningError::EmptySketch)));
    }

    #[test]
    fn test_query_rejects_invalid_rank() {
        let sketch = sketch_of(0.01, [1.0, 2.0]);
        assert!(matches!(sketch.query(1.5), Err(CleaningError::InvalidRank(_))));
        assert!(matches!(sketch.query(-0.1), Err(CleaningError::InvalidRank(_))));
        assert!(matches!(
            sketch.query(f64::NAN),
            Err(CleaningError::InvalidRank(_))
        ));
    }

    #[test]
    fn test_exact_small_input() {
        let sketch = sketch_of(0.01, (1..=100).rev().map(f64::from));
        assert_eq!(sketch.query(0.05).unwrap(), 5.0);
        assert_eq!(sketch.query(0.5).unwrap(), 50.0);
        assert_eq!(sketch.query(0.95).unwrap(), 95.0);
        assert_eq!(sketch.query(0.0).unwrap(), 1.0);
        assert_eq!(sketch.query(1.0).unwrap(), 100.0);
    }

    #[test]
    fn test_query_reads_through_buffer() {
        let mut sketch = QuantileSketch::new(0.01).unwrap();
        for value in [3.0, 1.0, 2.0] {
            sketch.insert(value).unwrap();
        }
        // nothing flushed yet: the buffer is still consulted
        assert_eq!(sketch.tuple_count(), 0);
        assert_eq!(sketch.query(0.5).unwrap(), 2.0);
        assert_eq!(sketch.count(), 3);
    }

    #[test]
    fn test_all_identical_values() {
        let sketch = sketch_of(0.01, std::iter::repeat_n(7.5, 10_000));
        assert_eq!(sketch.tuple_count(), 1);
        assert_eq!(sketch.query(0.05).unwrap(), 7.5);
        assert_eq!(sketch.query(0.95).unwrap(), 7.5);
    }

    #[test]
    fn test_duplicates_collapse_and_stay_exact() {
        // 40 distinct values (< 1/epsilon), each repeated 500 times
        let values: Vec<f64> = (0..20_000).map(|i| f64::from(i % 40)).collect();
        let sketch = sketch_of(0.01, values.iter().copied());
        assert_eq!(sketch.tuple_count(), 40);

        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        for rank in [0.0, 0.01, 0.05, 0.26, 0.5, 0.73, 0.95, 1.0] {
            let target = ((rank * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
            assert_eq!(sketch.query(rank).unwrap(), sorted[target - 1], "rank {rank}");
        }
    }

    #[test]
    fn test_negative_zero_joins_zero() {
        let sketch = sketch_of(0.1, [0.0, -0.0, 0.0]);
        assert_eq!(sketch.tuple_count(), 1);
        assert_eq!(sketch.tuples[0].weight, 3);
    }

    #[test]
    fn test_infinities_are_ordinary_values() {
        let sketch = sketch_of(0.1, [f64::NEG_INFINITY, 1.0, 2.0, f64::INFINITY]);
        assert_eq!(sketch.query(0.0).unwrap(), f64::NEG_INFINITY);
        assert_eq!(sketch.query(1.0).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_rank_error_and_memory_on_large_input() {
        let epsilon = 0.01;
        let n = 200_000u64;
        // deterministic scramble of 0..n
        let values: Vec<f64> = (0..n).map(|i| ((i * 7_919) % n) as f64).collect();
        let sketch = sketch_of(epsilon, values.iter().copied());

        assert_eq!(sketch.count(), n);
        assert!(
            sketch.tuple_count() < (n / 10) as usize,
            "summary kept {} tuples",
            sketch.tuple_count()
        );
        assert_eq!(sketch.tuples.iter().map(|t| t.weight).sum::<u64>(), n);

        let mut sorted = values;
        sorted.sort_by(f64::total_cmp);
        let slack = (epsilon * n as f64).ceil() as u64;
        for step in 0..=20 {
            let rank = f64::from(step) / 20.0;
            let value = sketch.query(rank).unwrap();
            let target = ((rank * n as f64).ceil() as u64).clamp(1, n);
            let (first, last) = true_positions(&sorted, value);
            assert!(
                target + slack >= first && target <= last + slack,
                "rank {rank}: value {value} at [{first}, {last}], target {target}"
            );
        }
    }

    #[test]
    fn test_compress_keeps_extremes_and_invariant() {
        let mut sketch = sketch_of(0.05, (0..5_000).map(|i| f64::from((i * 37) % 5_000)));
        sketch.compress();

        let first = sketch.tuples.first().unwrap();
        let last = sketch.tuples.last().unwrap();
        assert_eq!(first.value, 0.0);
        assert_eq!(first.first_max, 1);
        assert_eq!(last.value, 4_999.0);
        assert_eq!(last.last_min, 5_000);

        let limit = 2 * sketch.rank_slack() + 1;
        for pair in sketch.tuples.windows(2) {
            assert!(pair[1].first_max - pair[0].last_min <= limit);
        }
    }

    #[test]
    fn test_relax_spends_slack_and_keeps_rank_error() {
        let n = 50_000u64;
        let values: Vec<f64> = (0..n).map(|i| ((i * 7_919) % n) as f64).collect();
        let mut sketch = sketch_of(0.005, values.iter().copied());
        let tight = sketch.tuple_count();

        sketch.relax(0.05);
        assert_eq!(sketch.epsilon(), 0.05);
        assert_eq!(sketch.count(), n);
        assert!(
            sketch.tuple_count() < tight,
            "{} tuples before, {} after",
            tight,
            sketch.tuple_count()
        );

        let limit = 2 * sketch.rank_slack() + 1;
        for pair in sketch.tuples.windows(2) {
            assert!(pair[1].first_max - pair[0].last_min <= limit);
        }

        let mut sorted = values;
        sorted.sort_by(f64::total_cmp);
        let slack = (0.05 * n as f64).ceil() as u64;
        for step in 0..=10 {
            let rank = f64::from(step) / 10.0;
            let value = sketch.query(rank).unwrap();
            let target = ((rank * n as f64).ceil() as u64).clamp(1, n);
            let (first, last) = true_positions(&sorted, value);
            assert!(target + slack >= first && target <= last + slack);
        }
    }

    #[test]
    fn test_relax_never_tightens() {
        let mut sketch = sketch_of(0.05, (1..=1_000).map(f64::from));
        let before = sketch.clone();
        sketch.relax(0.01);
        sketch.relax(0.05);
        sketch.relax(1.0);
        assert_eq!(sketch, before);
    }

    #[test]
    fn test_query_many_is_monotone() {
        let sketch = sketch_of(0.05, (0..10_000).map(|i| f64::from((i * 7_919) % 10_000)));
        let ranks: Vec<f64> = (0..=50).map(|i| f64::from(i) / 50.0).collect();
        let answers = sketch.query_many(&ranks).unwrap();
        for pair in answers.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let values: Vec<f64> = (0..3_000).map(|i| f64::from((i * 31) % 1_000) / 3.0).collect();
        let a = sketch_of(0.02, values.iter().copied()).with_origin(3);
        let b = sketch_of(0.02, values.iter().copied()).with_origin(3);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_serde_round_trip_preserves_answers() {
        let sketch = sketch_of(0.01, (1..=500).map(f64::from));
        let json = serde_json::to_string(&sketch).unwrap();
        let restored: QuantileSketch = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sketch);
    }
}
