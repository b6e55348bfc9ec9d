//! Drones of the delivery fleet.

use common::DroneId;
use serde::{Deserialize, Serialize};

/// Operational status of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    #[default]
    Idle,
    Busy,
    Returning,
    Charging,
    Offline,
}

status_strings!(DroneStatus, "drone", {
    Idle => "idle",
    Busy => "busy",
    Returning => "returning",
    Charging => "charging",
    Offline => "offline",
});

/// A drone registered with the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub id: DroneId,
    pub model: String,
    pub ip_address: String,
    pub status: DroneStatus,
    /// Last reported battery level in percent, if telemetry has been received.
    pub battery_level: Option<f64>,
}

impl Drone {
    /// Creates an idle drone.
    pub fn new(model: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            id: DroneId::new(),
            model: model.into(),
            ip_address: ip_address.into(),
            status: DroneStatus::Idle,
            battery_level: None,
        }
    }

    /// Returns true if the drone can take a new delivery.
    ///
    /// A drone without battery telemetry is only checked for `Idle`.
    pub fn is_available(&self, min_battery: Option<f64>) -> bool {
        if self.status != DroneStatus::Idle {
            return false;
        }
        match (min_battery, self.battery_level) {
            (Some(threshold), Some(level)) => level >= threshold,
            _ => true,
        }
    }
}
