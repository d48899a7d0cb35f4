//! External summarizer and renderer invocation.
//!
//! Each run is bounded by a timeout and observes the worker's shutdown
//! token; a child that outlives either is killed.

use crate::config::{ToolCommand, ToolsConfig};
use crate::error::ToolError;
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Placeholder replaced by the tool's input path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced by the tool's output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// The two external steps that turn a capture into a report.
#[async_trait]
pub trait ReportTools: Send + Sync {
    /// Summarize `capture`, writing the summarizer's stdout to `document`.
    async fn summarize(&self, capture: &Path, document: &Path, workdir: &Path)
        -> Result<(), ToolError>;

    /// Render `document` into `target`.
    async fn render(&self, document: &Path, target: &Path, workdir: &Path)
        -> Result<(), ToolError>;
}

/// Runs the configured programs as child processes.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    summarizer: ToolCommand,
    renderer: ToolCommand,
    timeout: Duration,
    cancel: CancellationToken,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ExternalTools {
    pub fn new(config: &ToolsConfig, cancel: CancellationToken) -> Self {
        Self {
            summarizer: config.summarizer.clone(),
            renderer: config.renderer.clone(),
            timeout: config.timeout(),
            cancel,
        }
    }

    async fn run(
        &self,
        tool: &ToolCommand,
        input: &Path,
        output: &Path,
        capture_stdout: bool,
        workdir: &Path,
    ) -> Result<(), ToolError> {
        let program = tool.program.clone();

        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled { program });
        }

        let args = expand_args(&tool.args, input, output);
        debug!("Running {} {:?}", program, args);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if capture_stdout {
            let file = std::fs::File::create(output).map_err(|source| ToolError::Output {
                path: output.to_path_buf(),
                source,
            })?;
            command.stdout(Stdio::from(file));
        }

        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

        let waited = tokio::select! {
            _ = self.cancel.cancelled() => Waited::Cancelled,
            result = tokio::time::timeout(self.timeout, child.wait()) => match result {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
        };

        match waited {
            Waited::Exited(Ok(status)) if status.success() => Ok(()),
            Waited::Exited(Ok(status)) => Err(ToolError::Exit {
                program,
                code: status.code(),
            }),
            Waited::Exited(Err(source)) => Err(ToolError::Wait { program, source }),
            Waited::TimedOut => {
                warn!("{} exceeded {:?}, killing it", program, self.timeout);
                let _ = child.kill().await;
                Err(ToolError::TimedOut {
                    program,
                    timeout: self.timeout,
                })
            }
            Waited::Cancelled => {
                warn!("Shutdown requested, killing {}", program);
                let _ = child.kill().await;
                Err(ToolError::Cancelled { program })
            }
        }
    }
}

#[async_trait]
impl ReportTools for ExternalTools {
    async fn summarize(
        &self,
        capture: &Path,
        document: &Path,
        workdir: &Path,
    ) -> Result<(), ToolError> {
        self.run(&self.summarizer, capture, document, true, workdir)
            .await
    }

    async fn render(&self, document: &Path, target: &Path, workdir: &Path) -> Result<(), ToolError> {
        self.run(&self.renderer, document, target, false, workdir)
            .await
    }
}

/// Substitute the input/output placeholders in an argument template.
pub fn expand_args(template: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace(INPUT_PLACEHOLDER, &input)
                .replace(OUTPUT_PLACEHOLDER, &output)
        })
        .collect()
}
