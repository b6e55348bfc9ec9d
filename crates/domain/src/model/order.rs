//! Customer orders.

use chrono::{DateTime, Utc};
use common::{AutomatId, CellId, GoodId, OrderId, UserId};
use serde::{Deserialize, Serialize};

/// Status of an order, projected from its delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    InProgress,
    Delivered,
    Completed,
    Cancelled,
    Failed,
}

status_strings!(OrderStatus, "order", {
    Pending => "pending",
    InProgress => "in_progress",
    Delivered => "delivered",
    Completed => "completed",
    Cancelled => "cancelled",
    Failed => "failed",
});

impl OrderStatus {
    /// Returns true if the customer may still return the order.
    pub fn is_returnable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::InProgress)
    }
}

/// An order for a single good, delivered to one external locker cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub good_id: GoodId,
    pub parcel_automat_id: AutomatId,
    pub locker_cell_id: Option<CellId>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order.
    pub fn new(
        user_id: UserId,
        good_id: GoodId,
        parcel_automat_id: AutomatId,
        locker_cell_id: Option<CellId>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            good_id,
            parcel_automat_id,
            locker_cell_id,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
