//! Queue names and the durable topology declared on every connect.

/// Normal-priority delivery tasks.
pub const DELIVERIES: &str = "deliveries";
/// High-priority delivery tasks.
pub const DELIVERIES_PRIORITY: &str = "deliveries.priority";
/// Dead-letter queue for expired delivery tasks.
pub const DELIVERIES_DLQ: &str = "deliveries.dlq";
/// Goods-loaded confirmations coming back from the drone service.
pub const CONFIRMATIONS: &str = "confirmations";
/// Return-to-base tasks.
pub const DELIVERY_RETURN: &str = "delivery.return";

/// Time-to-live of an undelivered work item.
pub const MESSAGE_TTL_MS: i32 = 3_600_000;
pub const MAX_PRIORITY: u8 = 10;

/// Task priorities above this go to the priority queue.
pub const PRIORITY_THRESHOLD: u8 = 5;

/// Declaration parameters of one durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: &'static str,
    /// Routing key for dead-lettered messages (default exchange).
    pub dead_letter_routing_key: Option<&'static str>,
    pub message_ttl_ms: Option<i32>,
    pub max_priority: Option<u8>,
}

impl QueueSpec {
    const fn plain(name: &'static str) -> Self {
        Self {
            name,
            dead_letter_routing_key: None,
            message_ttl_ms: None,
            max_priority: None,
        }
    }

    const fn work(name: &'static str) -> Self {
        Self {
            name,
            dead_letter_routing_key: Some(DELIVERIES_DLQ),
            message_ttl_ms: Some(MESSAGE_TTL_MS),
            max_priority: Some(MAX_PRIORITY),
        }
    }
}

/// Every queue the transport declares, all durable.
pub const TOPOLOGY: [QueueSpec; 5] = [
    QueueSpec::work(DELIVERIES),
    QueueSpec::work(DELIVERIES_PRIORITY),
    QueueSpec::plain(DELIVERIES_DLQ),
    QueueSpec::plain(CONFIRMATIONS),
    QueueSpec::plain(DELIVERY_RETURN),
];

/// Message priority used when publishing to `queue`.
pub fn priority_for(queue: &str) -> u8 {
    if queue == DELIVERIES_PRIORITY {
        MAX_PRIORITY
    } else {
        0
    }
}

/// Queue a delivery task with the given priority is published to.
pub fn delivery_queue_for(priority: u8) -> &'static str {
    if priority > PRIORITY_THRESHOLD {
        DELIVERIES_PRIORITY
    } else {
        DELIVERIES
    }
}
