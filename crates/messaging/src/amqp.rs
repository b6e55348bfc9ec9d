//! RabbitMQ connector built on `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, acker::Acker};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::broker::{
    Acknowledger, BrokerChannel, Confirm, Connector, InboundMessage, InboundStream,
    OutboundMessage,
};
use crate::error::Result;
use crate::queues::QueueSpec;

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;

/// Connects to a RabbitMQ server by URL.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;

        let (closed_tx, closed) = watch::channel(None);
        connection.on_error(move |err| {
            closed_tx.send_replace(Some(err.to_string()));
        });

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
            closed,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    closed: watch::Receiver<Option<String>>,
}

fn queue_arguments(spec: &QueueSpec) -> FieldTable {
    let mut args = FieldTable::default();
    if let Some(routing_key) = spec.dead_letter_routing_key {
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(routing_key.into()),
        );
    }
    if let Some(ttl) = spec.message_ttl_ms {
        args.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl));
    }
    if let Some(priority) = spec.max_priority {
        args.insert("x-max-priority".into(), AMQPValue::LongInt(priority.into()));
    }
    args
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        self.channel
            .queue_declare(
                spec.name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(spec),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        message: OutboundMessage,
    ) -> Result<oneshot::Receiver<Confirm>> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(if message.persistent {
                PERSISTENT
            } else {
                TRANSIENT
            })
            .with_priority(message.priority);

        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            match confirm.await {
                Ok(Confirmation::Nack(_)) => {
                    let _ = tx.send(Confirm::Nack);
                }
                Ok(_) => {
                    let _ = tx.send(Confirm::Ack);
                }
                Err(err) => debug!(error = %err, "Publisher confirm lost"),
            }
        });
        Ok(rx)
    }

    async fn consume(&self, queue: &str) -> Result<InboundStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("orchestrator.{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue = queue.to_string();
        Ok(consumer
            .filter_map(move |delivery| {
                let queue = queue.clone();
                async move {
                    match delivery {
                        Ok(delivery) => Some(InboundMessage::new(
                            delivery.data,
                            Box::new(AmqpAcker(delivery.acker)),
                        )),
                        Err(err) => {
                            warn!(%queue, error = %err, "Consumer delivery error");
                            None
                        }
                    }
                }
            })
            .boxed())
    }

    fn closed(&self) -> watch::Receiver<Option<String>> {
        self.closed.clone()
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(200, "closing").await?;
        self.connection.close(200, "closing").await?;
        Ok(())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
