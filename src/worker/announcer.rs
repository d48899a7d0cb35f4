//! Lifecycle and outcome announcements.

use crate::broker::Publisher;
use crate::config::RedisConfig;
use crate::error::BrokerError;
use crate::models::{Notification, ServiceStatus};
use std::sync::Arc;
use tracing::info;

/// Publishes worker status and owner notification requests.
pub struct StatusAnnouncer {
    publisher: Arc<dyn Publisher>,
    status_channel: String,
    notify_channel: String,
}

impl StatusAnnouncer {
    pub fn new(publisher: Arc<dyn Publisher>, channels: &RedisConfig) -> Self {
        Self {
            publisher,
            status_channel: channels.status_channel.clone(),
            notify_channel: channels.notify_channel.clone(),
        }
    }

    pub async fn announce(&self, status: ServiceStatus) -> Result<(), BrokerError> {
        let payload = status.to_string();
        self.publisher
            .publish(&self.status_channel, &payload)
            .await?;
        info!("{}", payload);
        Ok(())
    }

    pub async fn notify(&self, notification: &Notification) -> Result<(), BrokerError> {
        let payload = notification.to_string();
        self.publisher
            .publish(&self.notify_channel, &payload)
            .await?;
        info!("Requested {} on {}", payload, self.notify_channel);
        Ok(())
    }
}
