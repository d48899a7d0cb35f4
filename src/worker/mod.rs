//! The report worker.
//!
//! This module provides the event dispatcher that owns the control channel
//! subscription and the announcer it reports through.

pub mod announcer;
pub mod dispatcher;

pub use announcer::StatusAnnouncer;
pub use dispatcher::Dispatcher;
