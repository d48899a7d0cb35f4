//! Shared profile registry.
//!
//! The registry is owned by the wider system; this worker only closes
//! profiles out once their report cycle is over. Both mutations are
//! best-effort: a `false` or an error is logged and never retried.

pub mod redis;

use crate::error::RegistryError;
use crate::models::ProfileName;
use async_trait::async_trait;
use tracing::{info, warn};

pub use self::redis::RedisRegistry;

/// Mutations this worker performs on the shared registry.
#[async_trait]
pub trait ProfileRegistry: Send + Sync {
    /// Remove the profile from the pending-report queue.
    async fn delete_profile_from_report_queue(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError>;

    /// Stamp the expired profile with the time it was reported.
    async fn update_reported_time_for_expired_profile(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError>;
}

/// What closing a profile out achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOut {
    pub dequeued: bool,
    pub stamped: bool,
}

/// Closes profiles out after a finished report cycle.
pub struct RegistryUpdater<'a> {
    registry: &'a dyn ProfileRegistry,
}

impl<'a> RegistryUpdater<'a> {
    pub fn new(registry: &'a dyn ProfileRegistry) -> Self {
        Self { registry }
    }

    /// Attempt both mutations exactly once, logging each result.
    pub async fn close_out(&self, profile: &ProfileName) -> CloseOut {
        let dequeued = settle(
            "delete_profile_from_report_queue",
            profile,
            self.registry.delete_profile_from_report_queue(profile).await,
        );
        let stamped = settle(
            "update_reported_time_for_expired_profile",
            profile,
            self.registry
                .update_reported_time_for_expired_profile(profile)
                .await,
        );
        CloseOut { dequeued, stamped }
    }
}

fn settle(step: &str, profile: &ProfileName, result: Result<bool, RegistryError>) -> bool {
    match result {
        Ok(true) => {
            info!("{} {}: true", step, profile);
            true
        }
        Ok(false) => {
            warn!("{} {}: false", step, profile);
            false
        }
        Err(e) => {
            warn!("{} {} failed: {}", step, profile, e);
            false
        }
    }
}
