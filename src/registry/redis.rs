//! Redis-backed profile registry.
//!
//! Pending profiles are fields of one hash; expired profiles are fields of
//! another hash whose values are JSON objects.

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::models::ProfileName;
use crate::registry::ProfileRegistry;
use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

/// Field written on an expired profile once its report went out.
pub const REPORTED_TIME_FIELD: &str = "reported_time";

pub struct RedisRegistry {
    conn: MultiplexedConnection,
    pending_hash: String,
    expired_hash: String,
}

impl RedisRegistry {
    pub fn new(conn: MultiplexedConnection, config: &RegistryConfig) -> Self {
        Self {
            conn,
            pending_hash: config.pending_hash.clone(),
            expired_hash: config.expired_hash.clone(),
        }
    }
}

#[async_trait]
impl ProfileRegistry for RedisRegistry {
    async fn delete_profile_from_report_queue(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(&self.pending_hash, profile.as_str()).await?;
        Ok(removed > 0)
    }

    async fn update_reported_time_for_expired_profile(
        &self,
        profile: &ProfileName,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.expired_hash, profile.as_str()).await?;
        let Some(raw) = raw else {
            debug!("{} has no entry in {}", profile, self.expired_hash);
            return Ok(false);
        };

        let stamped = stamp_reported_time(&raw, now_seconds()).map_err(|source| {
            RegistryError::InvalidEntry {
                profile: profile.to_string(),
                source,
            }
        })?;
        let Some(updated) = stamped else {
            debug!("{} entry in {} is not an object", profile, self.expired_hash);
            return Ok(false);
        };

        let _: i64 = conn
            .hset(&self.expired_hash, profile.as_str(), updated)
            .await?;
        Ok(true)
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Set `reported_time` on a JSON object entry.
///
/// Returns `Ok(None)` when the entry is valid JSON but not an object.
fn stamp_reported_time(raw: &str, reported_time: f64) -> Result<Option<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut entry) = value else {
        return Ok(None);
    };

    entry.insert(REPORTED_TIME_FIELD.to_string(), Value::from(reported_time));
    serde_json::to_string(&Value::Object(entry)).map(Some)
}
