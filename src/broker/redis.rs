//! Redis pub/sub transport.

use crate::broker::{Publisher, Subscription};
use crate::error::BrokerError;
use crate::models::{InboundMessage, MessageKind};
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Msg};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info};

/// Connection to the Redis server used for publishing and subscribing.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connect_err = |source| BrokerError::Connect {
            url: url.to_string(),
            source,
        };

        let client = Client::open(url).map_err(connect_err)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(connect_err)?;
        debug!("Redis answered {}", pong);

        Ok(Self { client, conn })
    }

    /// A handle on the shared connection, for the registry.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// Open a dedicated pub/sub connection subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<RedisSubscription, BrokerError> {
        let subscribe_err = |source| BrokerError::Subscribe {
            channel: channel.to_string(),
            source,
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_err)?;
        pubsub.subscribe(channel).await.map_err(subscribe_err)?;
        info!("Subscribed to channel {}", channel);

        Ok(RedisSubscription {
            stream: Some(pubsub.into_on_message().boxed()),
        })
    }
}

#[async_trait]
impl Publisher for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|source| BrokerError::Publish {
                channel: channel.to_string(),
                source,
            })?;
        debug!("Published {} on {} ({} receivers)", payload, channel, receivers);
        Ok(())
    }
}

/// Message stream of a Redis subscription.
///
/// Subscribe confirmations are consumed by the client library, so only
/// content and pattern messages come through here.
pub struct RedisSubscription {
    stream: Option<BoxStream<'static, Msg>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BrokerError> {
        let stream = self.stream.as_mut().ok_or(BrokerError::Closed)?;
        Ok(stream.next().await.map(|msg| to_inbound(&msg)))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.stream.take().is_some() {
            debug!("Closed Redis subscription");
        }
        Ok(())
    }
}

fn to_inbound(msg: &Msg) -> InboundMessage {
    let kind = if msg.from_pattern() {
        MessageKind::Other("pmessage".to_string())
    } else {
        MessageKind::Message
    };

    InboundMessage {
        kind,
        channel: msg.get_channel_name().to_string(),
        payload: String::from_utf8_lossy(msg.get_payload_bytes()).to_string(),
    }
}
