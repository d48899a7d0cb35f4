//! Data models for the report worker.
//!
//! This module contains the core data structures passed between the
//! dispatcher, the traffic processor, and the collaborators: profile names,
//! decoded commands, captures, report artifacts, and outbound messages.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Payload of the liveness probe.
pub const STATUS_PROBE: &str = "report_status";

/// Prefix of a report request; the profile name follows it.
pub const REPORT_REQUEST_PREFIX: &str = "report_profile:";

/// Service tag used in status announcements.
pub const SERVICE_TAG: &str = "MOD_REPORT";

/// Validated name of a monitored profile.
///
/// The name doubles as a directory component under the storage root, so it
/// may not be empty, contain path separators or NUL, or be `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileName(String);

impl ProfileName {
    /// Validate and wrap a profile name.
    pub fn parse(raw: &str) -> Result<Self, InvalidProfileName> {
        if raw.is_empty() {
            return Err(InvalidProfileName::Empty);
        }
        if raw == "." || raw == ".." {
            return Err(InvalidProfileName::Relative(raw.to_string()));
        }
        if raw.contains(['/', '\\', '\0']) {
            return Err(InvalidProfileName::Separator(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a profile name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidProfileName {
    #[error("profile name is empty")]
    Empty,
    #[error("profile name {0:?} is a relative path component")]
    Relative(String),
    #[error("profile name {0:?} contains a path separator or NUL")]
    Separator(String),
}

/// Kind of a message delivered by the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// A published content message.
    Message,
    /// Anything else the transport surfaces (subscribe acks, pattern matches, ...).
    Other(String),
}

/// A message received on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub channel: String,
    pub payload: String,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Message => write!(f, "message"),
            MessageKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

impl InboundMessage {
    /// Creates a content message.
    #[cfg(test)]
    pub fn message(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Message,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn is_content(&self) -> bool {
        self.kind == MessageKind::Message
    }
}

/// A command decoded from a control channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe: answer with an online announcement.
    StatusProbe,
    /// Produce the report for a profile.
    ReportProfile(ProfileName),
}

/// Why a payload did not decode into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload does not match any known command.
    Unrecognized,
    /// Payload is a report request with an unusable profile name.
    InvalidProfile(InvalidProfileName),
}

impl Command {
    /// Decode a control payload.
    ///
    /// The profile name is everything after the first colon of the report prefix.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        if payload == STATUS_PROBE {
            return Ok(Command::StatusProbe);
        }

        match payload.strip_prefix(REPORT_REQUEST_PREFIX) {
            Some(name) => ProfileName::parse(name)
                .map(Command::ReportProfile)
                .map_err(DecodeError::InvalidProfile),
            None => Err(DecodeError::Unrecognized),
        }
    }
}

/// A capture file found in a profile directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub size: u64,
}

impl CaptureFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Locations of the two report artifacts for a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportArtifacts {
    /// Intermediate structured-text document written by the summarizer.
    pub source: PathBuf,
    /// Final rendered document written by the renderer.
    pub rendered: PathBuf,
}

/// Result of running the traffic processor on one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No capture reached the size threshold; nothing was produced.
    NoValidCapture { inspected: usize },
    /// The first qualifying capture was summarized and rendered.
    Reported {
        capture: CaptureFile,
        artifacts: ReportArtifacts,
    },
}

impl ProcessOutcome {
    pub fn has_valid_capture(&self) -> bool {
        matches!(self, ProcessOutcome::Reported { .. })
    }
}

/// Terminal state of a report request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// All captures were empty or missing.
    EmptyCapture,
    /// A report was produced.
    Completed,
    /// Processing failed; the profile stays pending.
    Failed,
}

impl ReportOutcome {
    /// Whether this outcome closes the profile out in the registry.
    pub fn closes_profile(self) -> bool {
        !matches!(self, ReportOutcome::Failed)
    }

    pub fn notification(self, profile: &ProfileName) -> Notification {
        match self {
            ReportOutcome::EmptyCapture => Notification::EmptyCapture(profile.clone()),
            ReportOutcome::Completed => Notification::ReportReady(profile.clone()),
            ReportOutcome::Failed => Notification::ReportFailed(profile.clone()),
        }
    }
}

impl From<&ProcessOutcome> for ReportOutcome {
    fn from(outcome: &ProcessOutcome) -> Self {
        if outcome.has_valid_capture() {
            ReportOutcome::Completed
        } else {
            ReportOutcome::EmptyCapture
        }
    }
}

/// Request sent to the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    EmptyCapture(ProfileName),
    ReportReady(ProfileName),
    ReportFailed(ProfileName),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::EmptyCapture(name) => write!(f, "send_empty_capture_email:{}", name),
            Notification::ReportReady(name) => write!(f, "send_report_profile_email:{}", name),
            Notification::ReportFailed(name) => write!(f, "report_profile_failed:{}", name),
        }
    }
}

/// Worker liveness state published on the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Online,
    Offline,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Online => write!(f, "{}:online", SERVICE_TAG),
            ServiceStatus::Offline => write!(f, "{}:offline", SERVICE_TAG),
        }
    }
}
