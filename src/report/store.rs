use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::Result;
use crate::jenkins::links::cache_filename;

use super::types::PipelineReport;

const REPORT_EXTENSION: &str = "yaml";

/// Persisted pipeline reports, one YAML file per trigger build at
/// `<reports dir>/<host>/<path>.yaml`.
pub struct ReportStore {
    directory: PathBuf,
}

impl ReportStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn report_path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.directory.join(cache_filename(url, Some(REPORT_EXTENSION))?))
    }

    /// Reads a report. Missing or unreadable files count as no report.
    pub fn read(&self, url: &str) -> Result<Option<PipelineReport>> {
        let path = self.report_path(url)?;
        let Ok(content) = fs::read_to_string(&path) else {
            return Ok(None);
        };
        debug!("Reading {}", path.display());
        match serde_yaml::from_str(&content) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!("Ignoring unreadable report {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    pub fn write(&self, url: &str, report: &PipelineReport) -> Result<PathBuf> {
        let path = self.report_path(url)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("Writing {}", path.display());
        fs::write(&path, serde_yaml::to_string(report)?)?;
        Ok(path)
    }

    /// Deletes a report. Returns whether there was one.
    pub fn delete(&self, url: &str) -> Result<bool> {
        let path = self.report_path(url)?;
        if !path.exists() {
            return Ok(false);
        }
        info!("Deleting {}", path.display());
        fs::remove_file(&path)?;
        Ok(true)
    }
}
