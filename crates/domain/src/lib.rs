//! Domain layer for the drone delivery orchestrator.
//!
//! This crate provides:
//! - Entities for goods, locker cells, drones, parcel automats, orders and deliveries
//! - Status enums with the delivery-to-order status projection
//! - Repository traits consumed by the saga (single-entity atomic operations)
//! - In-memory repositories with conditional updates and failure injection

pub mod error;
pub mod memory;
pub mod model;
pub mod repository;

pub use error::{ParseStatusError, RepositoryError, Result};
pub use memory::{
    InMemoryDeliveryRepository, InMemoryDroneRepository, InMemoryGoodRepository,
    InMemoryLockerCellRepository, InMemoryOrderRepository, InMemoryParcelAutomatRepository,
};
pub use model::{
    CellStatus, Delivery, DeliveryStatus, Dimensions, Drone, DroneStatus, Good, LockerCell,
    Order, OrderStatus, ParcelAutomat,
};
pub use repository::{
    DeliveryRepository, DroneRepository, GoodRepository, LockerCellRepository, OrderRepository,
    ParcelAutomatRepository,
};
