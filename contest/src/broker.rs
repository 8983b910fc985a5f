//! RabbitMQ adapter.
//!
//! Topology per queue `q`: a durable direct exchange `q.dlx`, a durable
//! queue `q.dlq` bound to it with routing key `q`, and the durable main
//! queue `q` dead-lettering into the exchange. A failed delivery is
//! republished with an incremented `x-retry-count` header rather than
//! requeued, so the attempt history travels with the message; once the
//! budget is spent the message is nacked without requeue and the broker
//! routes it to the DLQ.

use std::{future::Future, sync::Arc};

use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{config::BrokerConfig, error::Result};

const RETRY_COUNT_HEADER: &str = "x-retry-count";
const LAST_ERROR_HEADER: &str = "x-last-error";
const PERSISTENT: u8 = 2;

#[derive(Clone)]
pub struct Broker {
    connection: Arc<Connection>,
    channel: Channel,
    max_retries: u32,
}

impl Broker {
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let connection =
            Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;

        info!(prefetch = config.prefetch, "Broker channel open");

        Ok(Self {
            connection: Arc::new(connection),
            channel,
            max_retries: config.max_retries,
        })
    }

    pub async fn assert_queue(&self, name: &str) -> Result<()> {
        let dlx = format!("{name}.dlx");
        let dlq = format!("{name}.dlq");

        self.channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_bind(&dlq, &dlx, name, QueueBindOptions::default(), FieldTable::default())
            .await?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx.as_str().into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(name.into()),
        );

        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await?;

        Ok(())
    }

    pub async fn publish<T: Serialize>(&self, queue: &str, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message)?;

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;

        Ok(())
    }

    /// Consume until the stream ends or the task is cancelled. The handler
    /// outcome drives the ack: success acks, failure goes through the
    /// retry/dead-letter policy.
    pub async fn consume<F, Fut, E>(&self, queue: &str, tag: &str, mut handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        let mut consumer = self
            .channel
            .basic_consume(queue, tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;

            match handler(&delivery.data).await {
                Ok(()) => delivery.ack(BasicAckOptions::default()).await?,
                Err(err) => {
                    let reason = err.to_string();
                    warn!(queue, error = %reason, "Job handler failed");
                    self.retry_or_dead_letter(queue, delivery, &reason).await?;
                }
            }
        }

        Ok(())
    }

    async fn retry_or_dead_letter(&self, queue: &str, delivery: Delivery, error: &str) -> Result<()> {
        let attempts = retry_count(&delivery);

        if attempts < self.max_retries {
            let mut headers = FieldTable::default();
            headers.insert(
                RETRY_COUNT_HEADER.into(),
                AMQPValue::LongInt((attempts + 1) as i32),
            );
            headers.insert(LAST_ERROR_HEADER.into(), AMQPValue::LongString(error.into()));

            self.channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    &delivery.data,
                    BasicProperties::default()
                        .with_delivery_mode(PERSISTENT)
                        .with_headers(headers),
                )
                .await?
                .await?;

            delivery.ack(BasicAckOptions::default()).await?;
        } else {
            warn!(queue, attempts, "Retry budget exhausted, dead-lettering");
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await?;
        }

        Ok(())
    }

    /// Best-effort queue depth; 0 when the probe fails.
    pub async fn queue_message_count(&self, name: &str) -> u32 {
        let probe = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;

        match probe {
            Ok(queue) => queue.message_count(),
            Err(err) => {
                warn!(queue = name, error = %err, "Queue depth probe failed");
                0
            }
        }
    }

    pub async fn purge_queue(&self, name: &str) -> Result<u32> {
        let purged = self
            .channel
            .queue_purge(name, QueuePurgeOptions::default())
            .await?;

        Ok(purged)
    }

    pub fn is_healthy(&self) -> bool {
        self.connection.status().connected()
    }
}

fn retry_count(delivery: &Delivery) -> u32 {
    let headers = match delivery.properties.headers() {
        Some(table) => table,
        None => return 0,
    };

    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .and_then(|(_, value)| match value {
            AMQPValue::ShortShortInt(n) => Some(*n as u32),
            AMQPValue::ShortInt(n) => Some(*n as u32),
            AMQPValue::LongInt(n) => Some(*n as u32),
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}
