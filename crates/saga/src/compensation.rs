//! Ordered compensation list for multi-step sagas.
//!
//! Each completed step registers the action that undoes it. On the first
//! failure the registered actions run in reverse order. Compensations are
//! best-effort: a failing one is logged and the rest still run.

use std::future::Future;
use std::sync::Arc;

use common::{CellId, DeliveryId, DroneId, GoodId, OrderId};
use domain::{
    CellStatus, DeliveryRepository, DeliveryStatus, DroneRepository, DroneStatus,
    GoodRepository, LockerCellRepository, OrderRepository, OrderStatus,
};
use futures_util::future::BoxFuture;

use crate::error::{Result, SagaError};

/// Compensations registered by the completed steps of one saga run.
pub struct Compensations {
    saga: &'static str,
    steps: Vec<(&'static str, BoxFuture<'static, Result<()>>)>,
}

impl Compensations {
    pub fn new(saga: &'static str) -> Self {
        Self {
            saga,
            steps: Vec::new(),
        }
    }

    /// Registers the compensation of a completed step.
    pub fn push<F>(&mut self, step: &'static str, action: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((step, Box::pin(action)));
    }

    /// Names of the steps with a registered compensation, in order.
    pub fn completed_steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(step, _)| *step).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs `action` as step `step`; on failure unwinds and returns the error.
    pub async fn step<T, E, F>(&mut self, step: &'static str, action: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<SagaError>,
    {
        match action.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = err.into();
                self.unwind(step, &err).await;
                Err(err)
            }
        }
    }

    /// Runs every registered compensation in reverse order.
    ///
    /// Returns the number of compensations that failed.
    pub async fn unwind(&mut self, failed_step: &'static str, cause: &SagaError) -> usize {
        let saga = self.saga;
        let steps = std::mem::take(&mut self.steps);
        tracing::warn!(
            saga,
            failed_step,
            error = %cause,
            compensations = steps.len(),
            "saga step failed, compensating"
        );

        let mut failed = 0;
        for (step, action) in steps.into_iter().rev() {
            metrics::counter!("saga_compensations_total", "saga" => saga, "step" => step)
                .increment(1);
            match action.await {
                Ok(()) => tracing::info!(saga, step, "compensation step completed"),
                Err(err) => {
                    failed += 1;
                    tracing::error!(saga, step, error = %err, "compensation step failed");
                }
            }
        }
        failed
    }
}

impl std::fmt::Debug for Compensations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compensations")
            .field("saga", &self.saga)
            .field("steps", &self.completed_steps())
            .finish()
    }
}

pub(crate) fn release_cell(
    cells: &Arc<dyn LockerCellRepository>,
    id: CellId,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let cells = Arc::clone(cells);
    async move { Ok(cells.update_status(id, CellStatus::Available).await?) }
}

pub(crate) fn restock(
    goods: &Arc<dyn GoodRepository>,
    id: GoodId,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let goods = Arc::clone(goods);
    async move {
        goods.adjust_quantity(id, 1).await?;
        Ok(())
    }
}

pub(crate) fn set_order_status(
    orders: &Arc<dyn OrderRepository>,
    id: OrderId,
    status: OrderStatus,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let orders = Arc::clone(orders);
    async move {
        orders.update_status(id, status).await?;
        Ok(())
    }
}

pub(crate) fn set_drone_status(
    drones: &Arc<dyn DroneRepository>,
    id: DroneId,
    status: DroneStatus,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let drones = Arc::clone(drones);
    async move { Ok(drones.update_status(id, status).await?) }
}

pub(crate) fn set_delivery_status(
    deliveries: &Arc<dyn DeliveryRepository>,
    id: DeliveryId,
    status: DeliveryStatus,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let deliveries = Arc::clone(deliveries);
    async move {
        deliveries.update_status(id, status).await?;
        Ok(())
    }
}

/// Moves a delivery back from `from` to `to`, leaving it alone if it has
/// moved on in the meantime.
pub(crate) fn revert_delivery_status(
    deliveries: &Arc<dyn DeliveryRepository>,
    id: DeliveryId,
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let deliveries = Arc::clone(deliveries);
    async move {
        match deliveries.transition_status(id, from, to).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => {
                tracing::debug!(delivery_id = %id, "delivery changed concurrently, not reverted");
                Ok(())
            }
            Err(err) => Err(SagaError::from(err)),
        }
    }
}

pub(crate) fn detach_drone(
    deliveries: &Arc<dyn DeliveryRepository>,
    id: DeliveryId,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let deliveries = Arc::clone(deliveries);
    async move {
        deliveries.update_drone(id, None).await?;
        Ok(())
    }
}
