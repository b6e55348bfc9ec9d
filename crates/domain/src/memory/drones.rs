use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::DroneId;

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::{Drone, DroneStatus};
use crate::repository::DroneRepository;

const ENTITY: &str = "drone";

#[derive(Debug, Default)]
struct DroneState {
    drones: Vec<Drone>,
    min_battery: Option<f64>,
    faults: Faults,
}

impl DroneState {
    fn find_mut(&mut self, id: DroneId) -> Result<&mut Drone> {
        self.drones
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))
    }
}

/// In-memory drone fleet.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDroneRepository {
    state: Arc<Mutex<DroneState>>,
}

impl InMemoryDroneRepository {
    /// Creates an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty fleet that only hands out drones charged to at least `percent`.
    pub fn with_battery_threshold(percent: f64) -> Self {
        let repo = Self::default();
        lock(&repo.state).min_battery = Some(percent);
        repo
    }

    /// Registers a drone.
    pub fn insert(&self, drone: Drone) -> DroneId {
        let id = drone.id;
        let mut state = lock(&self.state);
        state.drones.retain(|d| d.id != id);
        state.drones.push(drone);
        id
    }

    /// Returns the current status of a drone.
    pub fn status_of(&self, id: DroneId) -> Option<DroneStatus> {
        lock(&self.state)
            .drones
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.status)
    }

    /// Makes the named operation fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

#[async_trait]
impl DroneRepository for InMemoryDroneRepository {
    async fn create(&self, drone: Drone) -> Result<Drone> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "create")?;
        if state.drones.iter().any(|d| d.id == drone.id) {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: drone.id.to_string(),
                reason: "already exists".to_string(),
            });
        }
        state.drones.push(drone.clone());
        Ok(drone)
    }

    async fn get(&self, id: DroneId) -> Result<Drone> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "get")?;
        state.find_mut(id).map(|d| d.clone())
    }

    async fn get_available(&self) -> Result<Option<Drone>> {
        let state = lock(&self.state);
        state.faults.check(ENTITY, "get_available")?;
        Ok(state
            .drones
            .iter()
            .find(|d| d.is_available(state.min_battery))
            .cloned())
    }

    async fn update_status(&self, id: DroneId, status: DroneStatus) -> Result<()> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "update_status")?;
        state.find_mut(id)?.status = status;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: DroneId,
        from: DroneStatus,
        to: DroneStatus,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        state.faults.check(ENTITY, "transition_status")?;
        let drone = state.find_mut(id)?;
        if drone.status != from {
            tracing::debug!(%id, expected = %from, found = %drone.status, "drone transition conflict");
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                id: id.to_string(),
                reason: format!("expected {from}, found {}", drone.status),
            });
        }
        drone.status = to;
        Ok(())
    }
}
