//! Profile storage layout.
//!
//! Every profile owns one directory under the storage root holding its
//! captures and, once processed, its report artifacts.

use crate::config::{ReportConfig, StorageConfig};
use crate::models::{ProfileName, ReportArtifacts};
use std::path::{Path, PathBuf};

/// Resolves profile names to on-disk locations.
#[derive(Debug, Clone)]
pub struct StorageLocator {
    root: PathBuf,
    source_extension: String,
    output_extension: String,
}

impl StorageLocator {
    pub fn new(root: PathBuf, report: &ReportConfig) -> Self {
        Self {
            root,
            source_extension: report.source_extension.clone(),
            output_extension: report.output_extension.clone(),
        }
    }

    pub fn from_config(storage: &StorageConfig, report: &ReportConfig) -> Self {
        Self::new(storage.path.clone(), report)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the profile's captures.
    pub fn profile_dir(&self, profile: &ProfileName) -> PathBuf {
        self.root.join(profile.as_str())
    }

    /// Report artifact paths, both named after the profile.
    pub fn report_artifacts(&self, profile: &ProfileName) -> ReportArtifacts {
        let dir = self.profile_dir(profile);
        ReportArtifacts {
            source: dir.join(format!("{}.{}", profile, self.source_extension)),
            rendered: dir.join(format!("{}.{}", profile, self.output_extension)),
        }
    }
}
