use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::AutomatId;

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::ParcelAutomat;
use crate::repository::ParcelAutomatRepository;

const ENTITY: &str = "parcel automat";

#[derive(Debug, Default)]
struct AutomatState {
    automats: Vec<ParcelAutomat>,
    faults: Faults,
}

/// In-memory parcel automat registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryParcelAutomatRepository {
    state: Arc<Mutex<AutomatState>>,
}

impl InMemoryParcelAutomatRepository {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an automat.
    pub fn insert(&self, automat: ParcelAutomat) -> AutomatId {
        let id = automat.id;
        let mut state = lock(&self.state);
        state.automats.retain(|a| a.id != id);
        state.automats.push(automat);
        id
    }

    /// Marks an automat as working or out of service.
    pub fn set_working(&self, id: AutomatId, working: bool) {
        if let Some(automat) = lock(&self.state).automats.iter_mut().find(|a| a.id == id) {
            automat.is_working = working;
        }
    }

    /// Makes the named operation fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

#[async_trait]
impl ParcelAutomatRepository for InMemoryParcelAutomatRepository {
    async fn create(&self, automat: ParcelAutomat) -> Result<ParcelAutomat> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "create")?;
        if state.automats.iter().any(|a| a.id == automat.id) {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: automat.id.to_string(),
                reason: "already exists".to_string(),
            });
        }
        state.automats.push(automat.clone());
        Ok(automat)
    }

    async fn get(&self, id: AutomatId) -> Result<ParcelAutomat> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get")?;
        state
            .automats
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }

    async fn list_working(&self) -> Result<Vec<ParcelAutomat>> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "list_working")?;
        Ok(state
            .automats
            .iter()
            .filter(|a| a.is_working)
            .cloned()
            .collect())
    }
}
