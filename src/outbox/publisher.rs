//! Broker publisher
//!
//! Ships outbox rows to RabbitMQ. The exchange is a durable topic
//! declared on first publish; messages are persistent and carry the
//! event identity in their properties so consumers can deduplicate by
//! message id.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::OnceCell;

use super::OutboxMessage;

/// Errors from broker publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Failed(String),
}

/// Broker-facing seam. Implementations must tolerate redelivery; the
/// outbox guarantees at-least-once, not exactly-once.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}

/// RabbitMQ publisher over one connection, reused for the dispatcher's
/// lifetime.
pub struct RabbitMqPublisher {
    // The channel keeps the connection alive; held so it is not dropped.
    _connection: Connection,
    channel: Channel,
    exchange: String,
    exchange_ready: OnceCell<()>,
}

impl RabbitMqPublisher {
    /// Connect and open the publishing channel.
    pub async fn connect(uri: &str, exchange: impl Into<String>) -> Result<Self, PublishError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        Ok(Self {
            _connection: connection,
            channel,
            exchange: exchange.into(),
            exchange_ready: OnceCell::new(),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn ensure_exchange(&self) -> Result<(), PublishError> {
        self.exchange_ready
            .get_or_try_init(|| async {
                self.channel
                    .exchange_declare(
                        self.exchange.as_str(),
                        ExchangeKind::Topic,
                        ExchangeDeclareOptions {
                            durable: true,
                            ..ExchangeDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                Ok::<(), PublishError>(())
            })
            .await?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitMqPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        self.ensure_exchange().await?;

        let body = serde_json::to_vec(&message.payload)?;

        let mut properties = BasicProperties::default()
            .with_message_id(message.event_id.to_string().into())
            .with_kind(message.event_name.clone().into())
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_timestamp(message.occurred_at.timestamp().max(0) as u64);

        if let Some(correlation_id) = message.correlation_id {
            properties = properties.with_correlation_id(correlation_id.to_string().into());
        }

        self.channel
            .basic_publish(
                self.exchange.as_str(),
                message.event_name.as_str(),
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        tracing::debug!(
            event_id = %message.event_id,
            event_name = %message.event_name,
            exchange = %self.exchange,
            "event published"
        );

        Ok(())
    }
}
