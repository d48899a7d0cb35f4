//! Error types for each collaborator seam.
//!
//! Bootstrap code in `main` works with `anyhow`; the worker itself keeps
//! typed errors so it can tell a per-profile failure from a transport fault.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the pub/sub transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("failed to subscribe to channel {channel}: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("failed to publish on channel {channel}: {source}")]
    Publish {
        channel: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("subscription already closed")]
    Closed,
}

/// Failure talking to the shared profile registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid registry entry for {profile}: {source}")]
    InvalidEntry {
        profile: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    Exit { program: String, code: Option<i32> },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} cancelled by shutdown")]
    Cancelled { program: String },

    #[error("failed to prepare output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure processing one profile's captures.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("profile directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to read captures in {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ProcessError {
    /// Whether the failure came from a shutdown request rather than the profile itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Tool(ToolError::Cancelled { .. }))
    }
}

/// Fault that stops the dispatch loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
