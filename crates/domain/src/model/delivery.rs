//! Deliveries and the delivery-to-order status projection.

use common::{AutomatId, CellId, DeliveryId, DroneId, OrderId};
use serde::{Deserialize, Serialize};

use super::order::OrderStatus;

/// Status of a delivery.
///
/// State transitions:
/// ```text
/// AwaitingDrone ──► Pending ──► InTransit ──► Delivered
///       │              │            │
///       └──────────────┴────────────┴──► Cancelled | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    AwaitingDrone,
    Pending,
    InTransit,
    Delivered,
    Cancelled,
    Failed,
}

status_strings!(DeliveryStatus, "delivery", {
    AwaitingDrone => "awaiting_drone",
    Pending => "pending",
    InTransit => "in_transit",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Failed => "failed",
});

impl DeliveryStatus {
    /// The order status implied by this delivery status.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            DeliveryStatus::Pending => OrderStatus::InProgress,
            DeliveryStatus::AwaitingDrone => OrderStatus::Pending,
            DeliveryStatus::InTransit => OrderStatus::InProgress,
            DeliveryStatus::Delivered => OrderStatus::Delivered,
            DeliveryStatus::Failed => OrderStatus::Failed,
            DeliveryStatus::Cancelled => OrderStatus::Cancelled,
        }
    }

    /// Returns true while a drone is (or may be) carrying the good.
    pub fn is_active_flight(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::InTransit)
    }
}

/// The delivery of one order; created together with the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub order_id: OrderId,
    /// None until a drone is assigned.
    pub drone_id: Option<DroneId>,
    pub parcel_automat_id: AutomatId,
    pub internal_locker_cell_id: Option<CellId>,
    pub status: DeliveryStatus,
}

impl Delivery {
    /// Creates a delivery for an order.
    pub fn new(
        order_id: OrderId,
        drone_id: Option<DroneId>,
        parcel_automat_id: AutomatId,
        internal_locker_cell_id: Option<CellId>,
        status: DeliveryStatus,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            order_id,
            drone_id,
            parcel_automat_id,
            internal_locker_cell_id,
            status,
        }
    }
}
