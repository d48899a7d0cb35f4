//! Pub/sub transport.
//!
//! The worker only sees these two traits; the Redis implementation lives
//! in [`redis`] and in-memory fakes back the tests.

pub mod redis;

use crate::error::BrokerError;
use crate::models::InboundMessage;
use async_trait::async_trait;

pub use self::redis::RedisBroker;

/// Publishes string payloads on named channels.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;
}

/// A live subscription to the control channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the stream ended.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BrokerError>;

    /// Tear the subscription down. Safe to call more than once.
    async fn close(&mut self) -> Result<(), BrokerError>;
}
