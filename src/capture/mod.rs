//! Capture discovery for a profile directory.
//!
//! Captures are the visible regular files directly inside a profile directory
//! whose extension matches the configured one. Dotfiles are partial or
//! in-flight writes and are never captures. They are listed in file-name order
//! so that "first qualifying capture" means the same file on every host.

use crate::config::StorageConfig;
use crate::error::ProcessError;
use crate::models::CaptureFile;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Configuration for capture scanning.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture file extension (without dot), matched case-sensitively.
    pub extension: String,
    /// Captures below this size are degenerate and never reported.
    pub min_size: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            extension: "pcap".to_string(),
            min_size: 25,
        }
    }
}

impl From<&StorageConfig> for CaptureConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            extension: config.capture_extension.clone(),
            min_size: config.min_capture_bytes,
        }
    }
}

/// Lists and filters capture files.
#[derive(Debug, Clone)]
pub struct CaptureScanner {
    config: CaptureConfig,
}

impl CaptureScanner {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// List all captures in `dir`, sorted by file name.
    pub fn scan(&self, dir: &Path) -> Result<Vec<CaptureFile>, ProcessError> {
        if !dir.is_dir() {
            return Err(ProcessError::MissingDirectory(dir.to_path_buf()));
        }

        let mut captures = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|source| ProcessError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;

            if !entry.file_type().is_file() || is_hidden(&entry) || !self.matches(entry.path()) {
                continue;
            }

            let metadata = entry.metadata().map_err(|source| ProcessError::Scan {
                path: entry.path().to_path_buf(),
                source,
            })?;

            captures.push(CaptureFile {
                path: entry.into_path(),
                size: metadata.len(),
            });
        }

        debug!("Found {} captures in {}", captures.len(), dir.display());
        Ok(captures)
    }

    /// Whether a capture is large enough to be reported.
    pub fn qualifies(&self, capture: &CaptureFile) -> bool {
        capture.size >= self.config.min_size
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext == self.config.extension)
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
