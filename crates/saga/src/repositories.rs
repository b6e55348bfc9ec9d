//! The set of repositories the saga components work against.

use std::sync::Arc;

use domain::{
    DeliveryRepository, DroneRepository, GoodRepository, InMemoryDeliveryRepository,
    InMemoryDroneRepository, InMemoryGoodRepository, InMemoryLockerCellRepository,
    InMemoryOrderRepository, InMemoryParcelAutomatRepository, LockerCellRepository,
    OrderRepository, ParcelAutomatRepository,
};

/// Shared handles to every repository.
#[derive(Clone)]
pub struct Repositories {
    pub goods: Arc<dyn GoodRepository>,
    /// External (customer-facing) locker cells.
    pub cells: Arc<dyn LockerCellRepository>,
    /// Internal transfer cells; deployments without them skip that step.
    pub internal_cells: Option<Arc<dyn LockerCellRepository>>,
    pub drones: Arc<dyn DroneRepository>,
    pub automats: Arc<dyn ParcelAutomatRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories")
            .field("internal_cells", &self.internal_cells.is_some())
            .finish_non_exhaustive()
    }
}

/// Concrete in-memory stores, kept around for seeding and inspection.
#[derive(Debug, Clone)]
pub struct InMemoryStores {
    pub goods: InMemoryGoodRepository,
    pub cells: InMemoryLockerCellRepository,
    pub internal_cells: InMemoryLockerCellRepository,
    pub drones: InMemoryDroneRepository,
    pub automats: InMemoryParcelAutomatRepository,
    pub orders: InMemoryOrderRepository,
    pub deliveries: InMemoryDeliveryRepository,
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self {
            goods: InMemoryGoodRepository::new(),
            cells: InMemoryLockerCellRepository::new(),
            internal_cells: InMemoryLockerCellRepository::internal(),
            drones: InMemoryDroneRepository::new(),
            automats: InMemoryParcelAutomatRepository::new(),
            orders: InMemoryOrderRepository::new(),
            deliveries: InMemoryDeliveryRepository::new(),
        }
    }

    /// Returns trait-object handles sharing these stores.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            goods: Arc::new(self.goods.clone()),
            cells: Arc::new(self.cells.clone()),
            internal_cells: Some(Arc::new(self.internal_cells.clone())),
            drones: Arc::new(self.drones.clone()),
            automats: Arc::new(self.automats.clone()),
            orders: Arc::new(self.orders.clone()),
            deliveries: Arc::new(self.deliveries.clone()),
        }
    }
}
