//! Output writing.
//!
//! [`ReportGenerator`] writes the cleaned partitions as headed CSV files
//! (`part-00000.csv`, `part-00001.csv`, ...) into one dataset directory, and
//! the JSON run report next to it. Partitions are staged first and only
//! committed together with the report.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_cleaning::reporting::ReportGenerator;
//!
//! let generator = ReportGenerator::new(PathBuf::from("output"), "cleaned_dataset", false);
//! generator.stage_dataset(&result.dataset)?;
//! let dir = generator.commit(Some(&result.report()))?;
//! ```

mod generator;

pub use generator::{ReportGenerator, SUCCESS_MARKER};
