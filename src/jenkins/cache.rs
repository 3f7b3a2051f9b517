use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ReportError, Result};

use super::links::cache_filename;

/// The kinds of payload the data cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Job,
    Runs,
    ConsoleText,
}

impl CacheKind {
    fn file_for(self, url: &str) -> Result<PathBuf> {
        match self {
            Self::Job => cache_filename(url, Some("json")),
            Self::Runs => cache_filename(&format!("{url}runs"), Some("json")),
            Self::ConsoleText => cache_filename(&format!("{url}consoleText"), Some("txt")),
        }
    }
}

/// Which kinds of payload may be written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub jobs: bool,
    pub runs: bool,
    pub console_text: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            jobs: true,
            runs: true,
            console_text: false,
        }
    }
}

impl CachePolicy {
    pub fn allows(&self, kind: CacheKind) -> bool {
        match kind {
            CacheKind::Job => self.jobs,
            CacheKind::Runs => self.runs,
            CacheKind::ConsoleText => self.console_text,
        }
    }
}

/// On-disk cache of raw Jenkins payloads.
///
/// Files live at `<cache dir>/<host>/<path>.json` (console text as `.txt`).
/// Callers decide when an entry is trustworthy; the cache itself only reads
/// and writes. Volatile payloads must never be handed to [`DataCache::write_json`].
pub struct DataCache {
    directory: Option<PathBuf>,
    policy: CachePolicy,
}

impl DataCache {
    /// Creates a cache rooted at `directory`.
    pub fn new(directory: PathBuf, policy: CachePolicy) -> Self {
        info!("Data cache enabled at: {}", directory.display());
        Self {
            directory: Some(directory),
            policy,
        }
    }

    /// A cache that never reads or writes anything.
    pub fn disabled() -> Self {
        debug!("Data cache disabled");
        Self {
            directory: None,
            policy: CachePolicy {
                jobs: false,
                runs: false,
                console_text: false,
            },
        }
    }

    /// Platform cache directory, e.g. `~/.cache/pipeline-report/jenkins` on Linux.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no cache directory.
    pub fn default_directory() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .ok_or_else(|| ReportError::Cache("No cache directory found".into()))?
            .join("pipeline-report")
            .join("jenkins"))
    }

    pub fn allows(&self, kind: CacheKind) -> bool {
        self.directory.is_some() && self.policy.allows(kind)
    }

    fn path_for(&self, url: &str, kind: CacheKind) -> Option<PathBuf> {
        if !self.allows(kind) {
            return None;
        }
        let directory = self.directory.as_ref()?;
        match kind.file_for(url) {
            Ok(relative) => Some(directory.join(relative)),
            Err(e) => {
                warn!("Not caching {url}: {e}");
                None
            }
        }
    }

    /// Reads a cached JSON payload. Corrupt entries are treated as missing.
    pub fn read_json<T: DeserializeOwned>(&self, url: &str, kind: CacheKind) -> Option<T> {
        let path = self.path_for(url, kind)?;
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!("Cache hit for {url}: {}", path.display());
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {e}", path.display());
                None
            }
        }
    }

    pub fn read_text(&self, url: &str) -> Option<String> {
        let path = self.path_for(url, CacheKind::ConsoleText)?;
        let text = fs::read_to_string(&path).ok()?;
        debug!("Cache hit for {url}: {}", path.display());
        Some(text)
    }

    pub fn write_json<T: Serialize>(&self, url: &str, kind: CacheKind, value: &T) -> Result<()> {
        let Some(path) = self.path_for(url, kind) else {
            return Ok(());
        };
        write_file(&path, &serde_json::to_string(value)?)
    }

    pub fn write_text(&self, url: &str, text: &str) -> Result<()> {
        let Some(path) = self.path_for(url, CacheKind::ConsoleText) else {
            return Ok(());
        };
        write_file(&path, text)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    debug!("Wrote cache file: {}", path.display());
    Ok(())
}
