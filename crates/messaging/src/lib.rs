//! Messaging transport for the delivery orchestrator.
//!
//! This crate provides:
//! - The durable queue topology and the JSON wire messages
//! - A broker seam (`Connector` / `BrokerChannel`) with an in-memory broker
//!   and, behind the `amqp` feature, a RabbitMQ connector
//! - `Transport`: confirmed publish with a bounded wait, consumer dispatch
//!   with ack/nack, and a reconnect loop that replays consumers

pub mod broker;
pub mod client;
pub mod error;
pub mod memory;
pub mod messages;
pub mod queues;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use broker::{Acknowledger, BrokerChannel, Confirm, Connector, InboundMessage, OutboundMessage};
pub use client::{MessageHandler, Publisher, PublisherExt, Transport, TransportConfig};
pub use error::{BoxError, MessagingError, Result};
pub use memory::{ConfirmMode, InMemoryBroker, PublishedMessage};
pub use messages::{DeliveryConfirmation, DeliveryTask, ReturnTask};
pub use queues::QueueSpec;
