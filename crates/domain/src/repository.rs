//! Repository contracts consumed by the orchestration saga.
//!
//! Every operation is atomic for a single entity. No multi-entity
//! transactions are assumed; callers compose them with compensations.

use async_trait::async_trait;
use common::{AutomatId, CellId, DeliveryId, DroneId, GoodId, OrderId, UserId};

use crate::error::Result;
use crate::model::{
    CellStatus, Delivery, DeliveryStatus, Dimensions, Drone, DroneStatus, Good, LockerCell, Order,
    OrderStatus, ParcelAutomat,
};

/// Goods and their stock.
#[async_trait]
pub trait GoodRepository: Send + Sync {
    /// Adds a good to the catalog. Fails with `Conflict` on a duplicate id.
    async fn create(&self, good: Good) -> Result<Good>;

    async fn get(&self, id: GoodId) -> Result<Good>;

    async fn list(&self) -> Result<Vec<Good>>;

    /// Adds `delta` to the available quantity and returns the updated good.
    ///
    /// Fails with `InsufficientStock` if the result would be negative.
    async fn adjust_quantity(&self, id: GoodId, delta: i64) -> Result<Good>;
}

/// One pool of locker cells (external or internal).
#[async_trait]
pub trait LockerCellRepository: Send + Sync {
    async fn create(&self, cell: LockerCell) -> Result<LockerCell>;

    async fn get(&self, id: CellId) -> Result<LockerCell>;

    /// Finds the first available cell that fits the given dimensions.
    async fn find_available(&self, dimensions: &Dimensions) -> Result<Option<LockerCell>>;

    /// Unconditionally sets the cell status.
    async fn update_status(&self, id: CellId, status: CellStatus) -> Result<()>;

    /// Sets the cell status only if it is currently `from`.
    ///
    /// Fails with `Conflict` when the cell is in any other state.
    async fn transition_status(&self, id: CellId, from: CellStatus, to: CellStatus)
    -> Result<()>;

    /// Lists the cells of an automat ordered by cell number.
    async fn list_by_automat(&self, automat_id: AutomatId) -> Result<Vec<LockerCell>>;

    /// Changes the dimensions of an available cell.
    async fn update_dimensions(&self, id: CellId, dimensions: Dimensions) -> Result<LockerCell>;
}

/// The drone fleet.
#[async_trait]
pub trait DroneRepository: Send + Sync {
    async fn create(&self, drone: Drone) -> Result<Drone>;

    async fn get(&self, id: DroneId) -> Result<Drone>;

    /// Returns an available drone, or None if every drone is busy.
    async fn get_available(&self) -> Result<Option<Drone>>;

    async fn update_status(&self, id: DroneId, status: DroneStatus) -> Result<()>;

    /// Sets the drone status only if it is currently `from`.
    async fn transition_status(&self, id: DroneId, from: DroneStatus, to: DroneStatus)
    -> Result<()>;
}

/// Parcel automat installations.
#[async_trait]
pub trait ParcelAutomatRepository: Send + Sync {
    async fn create(&self, automat: ParcelAutomat) -> Result<ParcelAutomat>;

    async fn get(&self, id: AutomatId) -> Result<ParcelAutomat>;

    async fn list_working(&self) -> Result<Vec<ParcelAutomat>>;
}

/// Customer orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order>;

    async fn get(&self, id: OrderId) -> Result<Order>;

    /// Lists a user's orders, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order>;

    /// Returns the order whose goods sit in an external cell: the delivered
    /// one if there is one, else the most recent order for the cell.
    async fn get_by_locker_cell(&self, cell_id: CellId) -> Result<Order>;
}

/// Deliveries (one per order).
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn create(&self, delivery: Delivery) -> Result<Delivery>;

    async fn get(&self, id: DeliveryId) -> Result<Delivery>;

    async fn get_by_order(&self, order_id: OrderId) -> Result<Delivery>;

    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery>;

    /// Sets the delivery status only if it is currently `from`.
    ///
    /// Fails with `Conflict` when the delivery is in any other state.
    async fn transition_status(
        &self,
        id: DeliveryId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Delivery>;

    /// Attaches (or with `None`, detaches) a drone.
    async fn update_drone(&self, id: DeliveryId, drone_id: Option<DroneId>) -> Result<Delivery>;

    /// Lists deliveries in the given status in creation order.
    async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<Delivery>>;
}
