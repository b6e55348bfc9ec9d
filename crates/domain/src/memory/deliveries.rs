use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{DeliveryId, DroneId, OrderId};

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::{Delivery, DeliveryStatus};
use crate::repository::DeliveryRepository;

const ENTITY: &str = "delivery";

#[derive(Debug, Default)]
struct DeliveryState {
    deliveries: Vec<Delivery>,
    faults: Faults,
}

impl DeliveryState {
    fn find_mut(&mut self, id: DeliveryId) -> Result<&mut Delivery> {
        self.deliveries
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }
}

/// In-memory delivery store, kept in creation order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryRepository {
    state: Arc<Mutex<DeliveryState>>,
}

impl InMemoryDeliveryRepository {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every stored delivery.
    pub fn all(&self) -> Vec<Delivery> {
        lock(&self.state).deliveries.clone()
    }

    /// Returns the delivery for an order, if any.
    pub fn find_by_order(&self, order_id: OrderId) -> Option<Delivery> {
        lock(&self.state)
            .deliveries
            .iter()
            .find(|d| d.order_id == order_id)
            .cloned()
    }

    /// Makes the named operation fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn create(&self, delivery: Delivery) -> Result<Delivery> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "create")?;
        if state
            .deliveries
            .iter()
            .any(|d| d.id == delivery.id || d.order_id == delivery.order_id)
        {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: delivery.id.to_string(),
                reason: format!("order {} already has a delivery", delivery.order_id),
            });
        }
        state.deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn get(&self, id: DeliveryId) -> Result<Delivery> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "get")?;
        state.find_mut(id).map(|d| d.clone())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Delivery> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get_by_order")?;
        state
            .deliveries
            .iter()
            .find(|d| d.order_id == order_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, format!("order {order_id}")))
    }

    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "update_status")?;
        let delivery = state.find_mut(id)?;
        delivery.status = status;
        Ok(delivery.clone())
    }

    async fn transition_status(
        &self,
        id: DeliveryId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Delivery> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "transition_status")?;
        let delivery = state.find_mut(id)?;
        if delivery.status != from {
            tracing::debug!(%id, expected = %from, found = %delivery.status, "delivery transition conflict");
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: id.to_string(),
                reason: format!("expected {from}, found {}", delivery.status),
            });
        }
        delivery.status = to;
        Ok(delivery.clone())
    }

    async fn update_drone(&self, id: DeliveryId, drone_id: Option<DroneId>) -> Result<Delivery> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "update_drone")?;
        let delivery = state.find_mut(id)?;
        delivery.drone_id = drone_id;
        Ok(delivery.clone())
    }

    async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<Delivery>> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "list_by_status")?;
        Ok(state
            .deliveries
            .iter()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }
}
