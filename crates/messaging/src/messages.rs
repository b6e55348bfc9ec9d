//! JSON wire messages exchanged with the drone service.

use chrono::Utc;
use common::{AutomatId, CellId, DeliveryId, DroneId, GoodId, OrderId};
use serde::{Deserialize, Serialize};

/// ArUco marker of the home base drones return to.
pub const BASE_MARKER_ID: i32 = 131;

/// Priority of return-to-base tasks.
pub const RETURN_PRIORITY: u8 = 10;

/// Dispatch instruction for a drone: pick up a good and fly it to an automat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub drone_id: DroneId,
    pub drone_ip: String,
    pub order_id: OrderId,
    pub good_id: GoodId,
    pub parcel_automat_id: AutomatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_locker_cell_id: Option<CellId>,
    pub aruco_id: i32,
    pub coordinates: String,
    pub weight: f64,
    pub height: f64,
    pub length: f64,
    pub width: f64,
    pub priority: u8,
    /// Unix seconds.
    pub created_at: i64,
}

/// Sent by the drone service once the good sits in the destination cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub order_id: OrderId,
    pub locker_cell_id: CellId,
    pub automat_id: AutomatId,
    /// Unix seconds.
    pub confirmed_at: i64,
}

impl DeliveryConfirmation {
    pub fn new(order_id: OrderId, locker_cell_id: CellId, automat_id: AutomatId) -> Self {
        Self {
            order_id,
            locker_cell_id,
            automat_id,
            confirmed_at: Utc::now().timestamp(),
        }
    }
}

/// Orders a drone back to base after its delivery was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnTask {
    pub drone_id: DroneId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<DeliveryId>,
    #[serde(default = "default_base_marker")]
    pub base_marker_id: i32,
    #[serde(default = "default_return_priority")]
    pub priority: u8,
    pub created_at: i64,
}

fn default_base_marker() -> i32 {
    BASE_MARKER_ID
}

fn default_return_priority() -> u8 {
    RETURN_PRIORITY
}

impl ReturnTask {
    /// Creates a high-priority return task to the home base.
    pub fn new(drone_id: DroneId, delivery_id: Option<DeliveryId>) -> Self {
        Self {
            drone_id,
            delivery_id,
            base_marker_id: BASE_MARKER_ID,
            priority: RETURN_PRIORITY,
            created_at: Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivery_task_omits_missing_internal_cell() {
        let task = DeliveryTask {
            drone_id: DroneId::new(),
            drone_ip: "10.0.0.5".to_string(),
            order_id: OrderId::new(),
            good_id: GoodId::new(),
            parcel_automat_id: AutomatId::new(),
            internal_locker_cell_id: None,
            aruco_id: 7,
            coordinates: "58.01,56.22".to_string(),
            weight: 1.5,
            height: 10.0,
            length: 20.0,
            width: 15.0,
            priority: 0,
            created_at: 1_700_000_000,
        };

        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("internal_locker_cell_id").is_none());
        assert_eq!(value["aruco_id"], 7);
        assert_eq!(value["drone_id"], task.drone_id.to_string());
    }

    #[test]
    fn test_return_task_defaults_base_marker() {
        let drone_id = DroneId::new();
        let task: ReturnTask = serde_json::from_value(json!({
            "drone_id": drone_id,
            "created_at": 1_700_000_000,
        }))
        .unwrap();

        assert_eq!(task.base_marker_id, 131);
        assert_eq!(task.priority, 10);
        assert_eq!(task.delivery_id, None);
    }

    #[test]
    fn test_confirmation_rejects_malformed_ids() {
        let result = serde_json::from_value::<DeliveryConfirmation>(json!({
            "order_id": "not-a-uuid",
            "locker_cell_id": CellId::new(),
            "automat_id": AutomatId::new(),
            "confirmed_at": 0,
        }));
        assert!(result.is_err());
    }
}
