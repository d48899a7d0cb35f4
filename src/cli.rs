//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// mod_report - profile report worker
///
/// Subscribes to the report control channel, turns each requested
/// profile's captured traffic into a rendered report, and announces
/// the outcome so the owner can be notified.
///
/// Examples:
///   mod_report
///   mod_report --config /code/config/mod_report.toml
///   mod_report --redis-url redis://redis:6379 --storage-path /code/profiles
///   mod_report --process alice --json
///   mod_report --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for mod_report.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Redis connection URL
    #[arg(long, value_name = "URL", env = "MOD_REPORT_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Root directory holding one directory per profile
    #[arg(long, value_name = "DIR", env = "MOD_REPORT_STORAGE")]
    pub storage_path: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Timeout for each summarizer/renderer run, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Process a single profile locally and exit, without connecting to Redis
    #[arg(long, value_name = "PROFILE")]
    pub process: Option<String>,

    /// Print the --process outcome as JSON
    #[arg(long, requires = "process")]
    pub json: bool,

    /// Generate a default mod_report.toml configuration file
    #[arg(long, conflicts_with = "process")]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.redis_url {
            if !url.starts_with("redis://")
                && !url.starts_with("rediss://")
                && !url.starts_with("unix://")
            {
                return Err("Redis URL must start with 'redis://', 'rediss://' or 'unix://'".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref profile) = self.process {
            if let Err(e) = crate::models::ProfileName::parse(profile) {
                return Err(format!("Invalid profile: {}", e));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
