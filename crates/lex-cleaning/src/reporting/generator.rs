use crate::dataset::Dataset;
use crate::error::{CleaningError, Result, ResultExt};
use crate::types::CleaningReport;
use polars::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Marker file written into a completed output directory.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Writes cleaned partitions and run reports under one output directory.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    output_dir: PathBuf,
    dataset_name: String,
    overwrite: bool,
}

impl ReportGenerator {
    pub fn new(output_dir: PathBuf, dataset_name: impl Into<String>, overwrite: bool) -> Self {
        Self {
            output_dir,
            dataset_name: dataset_name.into(),
            overwrite,
        }
    }

    /// Directory the partitions end up in.
    pub fn dataset_dir(&self) -> PathBuf {
        self.output_dir.join(&self.dataset_name)
    }

    /// Path of the JSON run report.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_report.json", self.dataset_name))
    }

    fn staging_dir(&self) -> PathBuf {
        self.output_dir.join(format!(".{}.staging", self.dataset_name))
    }

    fn staged_report_path(&self) -> PathBuf {
        self.output_dir.join(format!(".{}_report.json.staging", self.dataset_name))
    }

    /// Write each partition to `part-NNNNN.csv` and commit the result.
    ///
    /// Shorthand for [`stage_dataset`](Self::stage_dataset) followed by
    /// [`commit`](Self::commit) without a report.
    pub fn write_dataset(&self, dataset: &Dataset) -> Result<PathBuf> {
        self.stage_dataset(dataset)?;
        self.commit(None)
    }

    /// Write each partition to `part-NNNNN.csv` with a header row, into a
    /// staging directory next to the dataset directory.
    ///
    /// Nothing is visible under the dataset path until [`commit`](Self::commit)
    /// succeeds. An existing dataset directory is an error unless overwriting
    /// is enabled. Returns the path the dataset will be committed to.
    pub fn stage_dataset(&self, dataset: &Dataset) -> Result<PathBuf> {
        let final_dir = self.dataset_dir();
        if final_dir.exists() && !self.overwrite {
            return Err(CleaningError::InvalidConfig(format!(
                "output path {} already exists",
                final_dir.display()
            )));
        }

        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(e) = self.write_partitions(dataset, &staging) {
            self.discard_staged();
            return Err(e);
        }

        debug!(
            "Staged {} partitions in {}",
            dataset.num_partitions(),
            staging.display()
        );
        Ok(final_dir)
    }

    /// Move the staged dataset, and `report` if given, into place.
    ///
    /// The report is written and published first; the dataset directory is
    /// only renamed into place once the report is there. On any failure the
    /// staged files and a freshly published report are removed, so the
    /// output directory holds either the complete result or nothing new.
    pub fn commit(&self, report: Option<&CleaningReport>) -> Result<PathBuf> {
        let result = self.publish(report);
        if result.is_err() {
            self.discard_staged();
        }
        result
    }

    fn publish(&self, report: Option<&CleaningReport>) -> Result<PathBuf> {
        let staging = self.staging_dir();
        if !staging.exists() {
            return Err(CleaningError::Internal(format!(
                "nothing staged for '{}'",
                self.dataset_name
            )));
        }

        let report_path = match report {
            Some(report) => {
                let staged = self.staged_report_path();
                write_json(report, &staged)?;
                let path = self.report_path();
                fs::rename(&staged, &path)
                    .map_err(CleaningError::from)
                    .context(format!("publishing {}", path.display()))?;
                Some(path)
            }
            None => None,
        };

        let final_dir = self.dataset_dir();
        if let Err(e) = replace_dir(&staging, &final_dir) {
            if let Some(path) = &report_path
                && let Err(cleanup) = fs::remove_file(path)
            {
                warn!("Failed to remove report {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        if let Some(path) = &report_path {
            info!("Report saved to: {}", path.display());
        }
        info!("Wrote dataset to {}", final_dir.display());
        Ok(final_dir)
    }

    /// Remove anything left in the staging area.
    pub fn discard_staged(&self) {
        let staging = self.staging_dir();
        if staging.exists()
            && let Err(e) = fs::remove_dir_all(&staging)
        {
            warn!("Failed to remove staging directory: {}", e);
        }
        let staged_report = self.staged_report_path();
        if staged_report.exists()
            && let Err(e) = fs::remove_file(&staged_report)
        {
            warn!("Failed to remove staged report: {}", e);
        }
    }

    fn write_partitions(&self, dataset: &Dataset, dir: &Path) -> Result<()> {
        for partition in dataset.partitions() {
            let path = dir.join(format!("part-{:05}.csv", partition.index()));
            let mut file = File::create(&path)?;
            let mut frame = partition.frame().clone();

            CsvWriter::new(&mut file)
                .include_header(true)
                .with_separator(b',')
                .with_quote_char(b'"')
                .finish(&mut frame)
                .context(format!("writing {}", path.display()))?;

            debug!("Wrote {} rows to {}", frame.height(), path.display());
        }

        File::create(dir.join(SUCCESS_MARKER))?;
        Ok(())
    }
}

fn write_json(report: &CleaningReport, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    let json = serde_json::to_string_pretty(report)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Rename `from` onto `to`, removing an existing `to` first.
fn replace_dir(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)?;
    Ok(())
}
