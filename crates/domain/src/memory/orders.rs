use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{CellId, OrderId, UserId};

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::{Order, OrderStatus};
use crate::repository::OrderRepository;

const ENTITY: &str = "order";

#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    faults: Faults,
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<Mutex<OrderState>>,
}

impl InMemoryOrderRepository {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub fn order_count(&self) -> usize {
        lock(&self.state).orders.len()
    }

    /// Returns the current status of an order.
    pub fn status_of(&self, id: OrderId) -> Option<OrderStatus> {
        lock(&self.state).orders.get(&id).map(|o| o.status)
    }

    /// Makes the named operation fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: Order) -> Result<Order> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "create")?;
        if state.orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: order.id.to_string(),
                reason: "already exists".to_string(),
            });
        }
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get")?;
        state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "list_by_user")?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "update_status")?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;
        order.status = status;
        Ok(order.clone())
    }

    async fn get_by_locker_cell(&self, cell_id: CellId) -> Result<Order> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get_by_locker_cell")?;
        state
            .orders
            .values()
            .filter(|o| o.locker_cell_id == Some(cell_id))
            .max_by_key(|o| (o.status == OrderStatus::Delivered, o.created_at))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, format!("cell {cell_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AutomatId, GoodId};

    #[tokio::test]
    async fn test_create_get_update() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), GoodId::new(), AutomatId::new(), None);
        let id = repo.create(order).await.unwrap().id;

        let updated = repo.update_status(id, OrderStatus::Failed).await.unwrap();
        assert_eq!(updated.status, OrderStatus::Failed);
        assert_eq!(repo.get(id).await.unwrap().status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_list_by_user() {
        let repo = InMemoryOrderRepository::new();
        let user = UserId::new();
        for _ in 0..2 {
            repo.create(Order::new(user, GoodId::new(), AutomatId::new(), None))
                .await
                .unwrap();
        }
        repo.create(Order::new(UserId::new(), GoodId::new(), AutomatId::new(), None))
            .await
            .unwrap();

        assert_eq!(repo.list_by_user(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_by_locker_cell_prefers_delivered_order() {
        let repo = InMemoryOrderRepository::new();
        let cell = CellId::new();
        let delivered = repo
            .create(Order::new(UserId::new(), GoodId::new(), AutomatId::new(), Some(cell)))
            .await
            .unwrap();
        repo.update_status(delivered.id, OrderStatus::Delivered)
            .await
            .unwrap();
        repo.create(Order::new(UserId::new(), GoodId::new(), AutomatId::new(), Some(cell)))
            .await
            .unwrap();

        assert_eq!(repo.get_by_locker_cell(cell).await.unwrap().id, delivered.id);
        assert!(
            repo.get_by_locker_cell(CellId::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let repo = InMemoryOrderRepository::new();
        repo.set_fail_on("create", true);
        let order = Order::new(UserId::new(), GoodId::new(), AutomatId::new(), None);
        assert!(repo.create(order).await.is_err());
        assert_eq!(repo.order_count(), 0);
    }
}
