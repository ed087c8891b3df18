//! Approximate quantiles over partitioned data.
//!
//! - [`QuantileSketch`]: bounded-memory summary of one column in one
//!   partition, with `epsilon` rank error
//! - [`QuantileCoordinator`]: builds one sketch per partition in parallel,
//!   merges them and answers rank queries from the merged result
//! - [`Bounds`]: the `[lower, upper]` interval used for outlier capping

mod coordinator;
mod sketch;

pub use coordinator::{Bounds, QuantileCoordinator, QuantileEstimates};
pub use sketch::{DEFAULT_EPSILON, QuantileSketch};
