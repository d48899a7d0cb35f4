//! Traffic processor: turns a profile's captures into a rendered report.

use crate::capture::CaptureScanner;
use crate::error::{ProcessError, ToolError};
use crate::models::{ProcessOutcome, ProfileName, ReportArtifacts};
use crate::report::tools::ReportTools;
use crate::storage::StorageLocator;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Produces a report from the first capture that is not degenerate.
pub struct TrafficProcessor {
    locator: StorageLocator,
    scanner: CaptureScanner,
    tools: Arc<dyn ReportTools>,
}

impl TrafficProcessor {
    pub fn new(locator: StorageLocator, scanner: CaptureScanner, tools: Arc<dyn ReportTools>) -> Self {
        Self {
            locator,
            scanner,
            tools,
        }
    }

    /// Process one profile.
    ///
    /// Only the first qualifying capture (in file-name order) is reported;
    /// the others are left for a later multi-capture report.
    pub async fn process(&self, profile: &ProfileName) -> Result<ProcessOutcome, ProcessError> {
        let start = Instant::now();
        let dir = self.locator.profile_dir(profile);
        let captures = self.scanner.scan(&dir)?;

        for capture in &captures {
            info!("Processing capture {} ({} b)", capture.file_name(), capture.size);

            if !self.scanner.qualifies(capture) {
                debug!("Capture {} is empty, skipping", capture.file_name());
                continue;
            }

            let artifacts = self.locator.report_artifacts(profile);

            if let Err(e) = self.report(&capture.path, &artifacts, &dir).await {
                discard(&artifacts);
                return Err(e.into());
            }

            info!(
                "Report for {} ready in {:.1}s",
                profile,
                start.elapsed().as_secs_f64()
            );
            return Ok(ProcessOutcome::Reported {
                capture: capture.clone(),
                artifacts,
            });
        }

        Ok(ProcessOutcome::NoValidCapture {
            inspected: captures.len(),
        })
    }

    async fn report(
        &self,
        capture: &Path,
        artifacts: &ReportArtifacts,
        dir: &Path,
    ) -> Result<(), ToolError> {
        info!("Running the summarizer on {}", capture.display());
        self.tools.summarize(capture, &artifacts.source, dir).await?;

        info!("Rendering {}", artifacts.rendered.display());
        self.tools
            .render(&artifacts.source, &artifacts.rendered, dir)
            .await
    }
}

/// Remove whatever a failed run left behind, so a truncated document never
/// sits next to an earlier rendered report.
fn discard(artifacts: &ReportArtifacts) {
    for path in [&artifacts.source, &artifacts.rendered] {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
