//! Configuration file handling.
//!
//! This module handles loading `mod_report.toml` and merging it with
//! command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mod_report.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pub/sub connection and channel names.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Shared registry hash names.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Profile storage layout.
    #[serde(default)]
    pub storage: StorageConfig,

    /// External summarizer and renderer.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Report artifact naming.
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging settings.
    #[serde(default)]
    pub logs: LogsConfig,
}

/// Redis connection and channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Channel this worker subscribes to for commands.
    #[serde(default = "default_control_channel")]
    pub control_channel: String,

    /// Channel for online/offline announcements.
    #[serde(default = "default_status_channel")]
    pub status_channel: String,

    /// Channel for owner notification requests.
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            control_channel: default_control_channel(),
            status_channel: default_status_channel(),
            notify_channel: default_notify_channel(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_control_channel() -> String {
    "mod_report_check".to_string()
}

fn default_status_channel() -> String {
    "services_status".to_string()
}

fn default_notify_channel() -> String {
    "mod_comm_send_check".to_string()
}

/// Hash tables of the shared profile registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Profiles awaiting a report.
    #[serde(default = "default_pending_hash")]
    pub pending_hash: String,

    /// Expired profiles, each a JSON object carrying `reported_time`.
    #[serde(default = "default_expired_hash")]
    pub expired_hash: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pending_hash: default_pending_hash(),
            expired_hash: default_expired_hash(),
        }
    }
}

fn default_pending_hash() -> String {
    "profiles_to_report".to_string()
}

fn default_expired_hash() -> String {
    "expired_profiles".to_string()
}

/// Profile storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one directory per profile.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Extension of capture files (without dot).
    #[serde(default = "default_capture_extension")]
    pub capture_extension: String,

    /// Captures smaller than this many bytes are treated as empty.
    #[serde(default = "default_min_capture_bytes")]
    pub min_capture_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            capture_extension: default_capture_extension(),
            min_capture_bytes: default_min_capture_bytes(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/code/profiles")
}

fn default_capture_extension() -> String {
    "pcap".to_string()
}

fn default_min_capture_bytes() -> u64 {
    25
}

/// One external program and its argument template.
///
/// `{input}` and `{output}` in `args` are replaced per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Upper bound for a single tool run, in seconds.
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,

    /// Writes the report document for a capture to stdout.
    #[serde(default = "default_summarizer")]
    pub summarizer: ToolCommand,

    /// Turns the report document into the final artifact.
    #[serde(default = "default_renderer")]
    pub renderer: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_tool_timeout(),
            summarizer: default_summarizer(),
            renderer: default_renderer(),
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_tool_timeout() -> u64 {
    600 // pandoc with xelatex is slow on large summaries
}

fn default_summarizer() -> ToolCommand {
    ToolCommand {
        program: "/code/SimplePcapSummarizer/spsummarizer.sh".to_string(),
        args: vec!["{input}".to_string()],
    }
}

fn default_renderer() -> ToolCommand {
    ToolCommand {
        program: "pandoc".to_string(),
        args: vec![
            "{input}".to_string(),
            "--pdf-engine=xelatex".to_string(),
            "-o".to_string(),
            "{output}".to_string(),
        ],
    }
}

/// Report artifact naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Extension of the intermediate document.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Extension of the rendered document.
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            source_extension: default_source_extension(),
            output_extension: default_output_extension(),
        }
    }
}

fn default_source_extension() -> String {
    "md".to_string()
}

fn default_output_extension() -> String {
    "pdf".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable debug logging.
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values explicitly given on the command line (or via env) override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.redis_url {
            self.redis.url = url.clone();
        }
        if let Some(ref path) = args.storage_path {
            self.storage.path = path.clone();
        }
        if let Some(ref file) = args.log_file {
            self.logs.file = Some(file.clone());
        }
        if let Some(timeout) = args.timeout {
            self.tools.timeout_seconds = timeout;
        }
        if args.verbose {
            self.logs.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
