//! Entities and status enums of the delivery domain.

#[macro_use]
mod status;

pub mod automat;
pub mod delivery;
pub mod drone;
pub mod good;
pub mod locker;
pub mod order;

pub use automat::ParcelAutomat;
pub use delivery::{Delivery, DeliveryStatus};
pub use drone::{Drone, DroneStatus};
pub use good::{Dimensions, Good};
pub use locker::{CellStatus, LockerCell};
pub use order::{Order, OrderStatus};
