//! Report production.
//!
//! This module provides the traffic processor and the external tools it
//! drives to summarize and render a capture.

pub mod processor;
pub mod tools;

pub use processor::TrafficProcessor;
pub use tools::{ExternalTools, ReportTools};
