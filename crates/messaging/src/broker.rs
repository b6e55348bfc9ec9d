//! The seam between the transport and a concrete broker.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::{oneshot, watch};

use crate::error::Result;
use crate::queues::QueueSpec;

/// Broker verdict on a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    Ack,
    Nack,
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub priority: u8,
    pub persistent: bool,
}

/// Settles one consumed message.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer.
pub struct InboundMessage {
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { body, acker }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Stream of consumed messages; ends when the channel goes away.
pub type InboundStream = BoxStream<'static, InboundMessage>;

/// One live channel in publisher-confirm mode.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a durable queue. Redeclaring with the same parameters is a no-op.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Publishes to `queue` on the default exchange.
    ///
    /// The receiver resolves with the broker's verdict. It is dropped without
    /// a value if the channel dies first.
    async fn publish(
        &self,
        queue: &str,
        message: OutboundMessage,
    ) -> Result<oneshot::Receiver<Confirm>>;

    /// Starts a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<InboundStream>;

    /// Close notification: `None` while open, the close reason afterwards.
    fn closed(&self) -> watch::Receiver<Option<String>>;

    async fn close(&self) -> Result<()>;
}

/// Opens channels to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>>;
}
