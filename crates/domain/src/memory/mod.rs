//! In-memory repository implementations.
//!
//! Used by tests and local runs. Status changes that reserve a resource are
//! conditional (`transition_status`) and stock can never drop below zero, so
//! concurrent sagas racing for the same cell or unit see a `Conflict`.
//! Every repository can be told to fail a named operation.

mod automats;
mod cells;
mod deliveries;
mod drones;
mod goods;
mod orders;

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{RepositoryError, Result};

pub use automats::InMemoryParcelAutomatRepository;
pub use cells::InMemoryLockerCellRepository;
pub use deliveries::InMemoryDeliveryRepository;
pub use drones::InMemoryDroneRepository;
pub use goods::InMemoryGoodRepository;
pub use orders::InMemoryOrderRepository;

/// Set of operation names that should fail with `Unavailable`.
#[derive(Debug, Default)]
struct Faults {
    failing: HashSet<&'static str>,
}

impl Faults {
    fn set(&mut self, operation: &'static str, fail: bool) {
        if fail {
            self.failing.insert(operation);
        } else {
            self.failing.remove(operation);
        }
    }

    fn check(&self, entity: &str, operation: &'static str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(RepositoryError::Unavailable(format!(
                "{entity} {operation}: injected failure"
            )));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
