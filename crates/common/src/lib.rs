//! Shared types for the drone delivery orchestrator.

mod types;

pub use types::{AutomatId, CellId, DeliveryId, DroneId, GoodId, OrderId, UserId};
