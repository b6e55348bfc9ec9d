use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::GoodId;

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::Good;
use crate::repository::GoodRepository;

const ENTITY: &str = "good";

#[derive(Debug, Default)]
struct GoodState {
    goods: HashMap<GoodId, Good>,
    faults: Faults,
}

/// In-memory goods catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGoodRepository {
    state: Arc<Mutex<GoodState>>,
}

impl InMemoryGoodRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a good, replacing any good with the same id.
    pub fn insert(&self, good: Good) -> GoodId {
        let id = good.id;
        lock(&self.state).goods.insert(id, good);
        id
    }

    /// Returns the available quantity of a good.
    pub fn quantity(&self, id: GoodId) -> Option<i64> {
        lock(&self.state).goods.get(&id).map(|g| g.quantity_available)
    }

    /// Makes the named operation (`get`, `list`, `adjust_quantity`) fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

#[async_trait]
impl GoodRepository for InMemoryGoodRepository {
    async fn create(&self, good: Good) -> Result<Good> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "create")?;
        if state.goods.contains_key(&good.id) {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: good.id.to_string(),
                reason: "already exists".to_string(),
            });
        }
        state.goods.insert(good.id, good.clone());
        Ok(good)
    }

    async fn get(&self, id: GoodId) -> Result<Good> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get")?;
        state
            .goods
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }

    async fn list(&self) -> Result<Vec<Good>> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "list")?;
        let mut goods: Vec<Good> = state.goods.values().cloned().collect();
        goods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(goods)
    }

    async fn adjust_quantity(&self, id: GoodId, delta: i64) -> Result<Good> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "adjust_quantity")?;
        let good = state
            .goods
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;

        let updated = good.quantity_available + delta;
        if updated < 0 {
            return Err(RepositoryError::InsufficientStock {
                id: id.to_string(),
                available: good.quantity_available,
                delta,
            });
        }
        good.quantity_available = updated;
        Ok(good.clone())
    }
}
