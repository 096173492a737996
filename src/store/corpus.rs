//! Training corpus - labeled feature rows for the retraining job

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::StoreError;
use crate::strategy::FeatureSnapshot;

/// Name of the label column
pub const TARGET_COLUMN: &str = "target";

/// Append-only CSV of `feature..., target` rows
pub struct TrainingCorpus {
    path: PathBuf,
}

impl TrainingCorpus {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Existing header, or `None` if the corpus has not been started
    pub fn header(&self) -> Result<Option<Vec<String>>, StoreError> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() == 0 => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        Ok(Some(reader.headers()?.iter().map(str::to_string).collect()))
    }

    /// Append one labeled row, then flush and fsync.
    ///
    /// A new corpus gets `schema` plus the target column as its header. An
    /// existing one keeps its header; columns the snapshot lacks are written
    /// as 0.
    pub fn append(&self, schema: &[String], snapshot: &FeatureSnapshot, target: u8) -> Result<(), StoreError> {
        let existing = self.header()?;
        let write_header = existing.is_none();
        let header = existing.unwrap_or_else(|| {
            schema
                .iter()
                .cloned()
                .chain(std::iter::once(TARGET_COLUMN.to_string()))
                .collect()
        });

        let row: Vec<String> = header
            .iter()
            .map(|column| {
                if column == TARGET_COLUMN {
                    target.to_string()
                } else {
                    snapshot.get(column).copied().unwrap_or(0.0).to_string()
                }
            })
            .collect();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if write_header {
            writer.write_record(&header)?;
        }
        writer.write_record(&row)?;
        writer.flush().map_err(|e| self.io_err(e))?;

        let file = writer
            .into_inner()
            .map_err(|e| self.io_err(std::io::Error::other(e.to_string())))?;
        file.sync_all().map_err(|e| self.io_err(e))?;

        debug!("Appended row with target {} to {}", target, self.path.display());
        Ok(())
    }

    /// Number of data rows
    pub fn row_count(&self) -> Result<usize, StoreError> {
        if self.header()?.is_none() {
            return Ok(0);
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut count = 0;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }
}
