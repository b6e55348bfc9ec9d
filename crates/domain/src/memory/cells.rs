use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{AutomatId, CellId};

use super::{Faults, lock};
use crate::error::{RepositoryError, Result};
use crate::model::{CellStatus, Dimensions, LockerCell};
use crate::repository::LockerCellRepository;

#[derive(Debug)]
struct CellState {
    entity: &'static str,
    cells: Vec<LockerCell>,
    faults: Faults,
}

/// In-memory pool of locker cells.
///
/// The same type backs both the external and the internal pool; the label
/// only shows up in error messages.
#[derive(Debug, Clone)]
pub struct InMemoryLockerCellRepository {
    state: Arc<Mutex<CellState>>,
}

impl Default for InMemoryLockerCellRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLockerCellRepository {
    /// Creates an empty external cell pool.
    pub fn new() -> Self {
        Self::labelled("locker cell")
    }

    /// Creates an empty internal (transfer) cell pool.
    pub fn internal() -> Self {
        Self::labelled("internal locker cell")
    }

    fn labelled(entity: &'static str) -> Self {
        Self {
            state: Arc::new(Mutex::new(CellState {
                entity,
                cells: Vec::new(),
                faults: Faults::default(),
            })),
        }
    }

    /// Stores a cell.
    pub fn insert(&self, cell: LockerCell) -> CellId {
        let id = cell.id;
        let mut state = lock(&self.state);
        state.cells.retain(|c| c.id != id);
        state.cells.push(cell);
        id
    }

    /// Returns the current status of a cell.
    pub fn status_of(&self, id: CellId) -> Option<CellStatus> {
        lock(&self.state)
            .cells
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.status)
    }

    /// Counts cells in the given status.
    pub fn count_with_status(&self, status: CellStatus) -> usize {
        lock(&self.state)
            .cells
            .iter()
            .filter(|c| c.status == status)
            .count()
    }

    /// Makes the named operation fail.
    pub fn set_fail_on(&self, operation: &'static str, fail: bool) {
        lock(&self.state).faults.set(operation, fail);
    }
}

impl CellState {
    fn find_mut(&mut self, id: CellId) -> Result<&mut LockerCell> {
        let entity = self.entity;
        self.cells
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RepositoryError::not_found(entity, id))
    }
}

#[async_trait]
impl LockerCellRepository for InMemoryLockerCellRepository {
    async fn create(&self, cell: LockerCell) -> Result<LockerCell> {
        let mut state = lock(&self.state);
        state.faults.check(state.entity, "create")?;
        if state
            .cells
            .iter()
            .any(|c| {
                c.id == cell.id || (c.automat_id == cell.automat_id && c.number == cell.number)
            })
        {
            return Err(RepositoryError::Conflict {
                entity: state.entity,
                id: cell.id.to_string(),
                reason: format!(
                    "cell {} already exists in automat {}",
                    cell.number, cell.automat_id
                ),
            });
        }
        state.cells.push(cell.clone());
        Ok(cell)
    }

    async fn get(&self, id: CellId) -> Result<LockerCell> {
        let mut state = lock(&self.state);
        state.faults.check(state.entity, "get")?;
        state.find_mut(id).map(|c| c.clone())
    }

    async fn find_available(&self, dimensions: &Dimensions) -> Result<Option<LockerCell>> {
        let state = lock(&self.state);
        state.faults.check(state.entity, "find_available")?;
        Ok(state
            .cells
            .iter()
            .filter(|c| c.status == CellStatus::Available && c.fits(dimensions))
            .min_by_key(|c| c.number)
            .cloned())
    }

    async fn update_status(&self, id: CellId, status: CellStatus) -> Result<()> {
        let mut state = lock(&self.state);
        state.faults.check(state.entity, "update_status")?;
        state.find_mut(id)?.status = status;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: CellId,
        from: CellStatus,
        to: CellStatus,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        state.faults.check(state.entity, "transition_status")?;
        let entity = state.entity;
        let cell = state.find_mut(id)?;
        if cell.status != from {
            tracing::debug!(%id, expected = %from, found = %cell.status, "cell transition conflict");
            return Err(RepositoryError::Conflict {
                entity,
                id: id.to_string(),
                reason: format!("expected {from}, found {}", cell.status),
            });
        }
        cell.status = to;
        Ok(())
    }

    async fn list_by_automat(&self, automat_id: AutomatId) -> Result<Vec<LockerCell>> {
        let state = lock(&self.state);
        state.faults.check(state.entity, "list_by_automat")?;
        let mut cells: Vec<LockerCell> = state
            .cells
            .iter()
            .filter(|c| c.automat_id == automat_id)
            .cloned()
            .collect();
        cells.sort_by_key(|c| c.number);
        Ok(cells)
    }

    async fn update_dimensions(&self, id: CellId, dimensions: Dimensions) -> Result<LockerCell> {
        let mut state = lock(&self.state);
        state.faults.check(state.entity, "update_dimensions")?;
        let cell = state.find_mut(id)?;
        if cell.status != CellStatus::Available {
            return Err(RepositoryError::InvalidOperation(format!(
                "cannot resize cell {id} while it is {}",
                cell.status
            )));
        }
        cell.dimensions = dimensions;
        Ok(cell.clone())
    }
}
