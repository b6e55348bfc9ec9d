//! Background worker that dispatches deliveries left waiting for a drone.

use std::sync::Arc;
use std::time::Duration;

use domain::{Delivery, DeliveryStatus, DroneStatus};
use messaging::Publisher;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::compensation::{self, Compensations};
use crate::dispatch;
use crate::error::{Result, SagaError};
use crate::repositories::Repositories;
use crate::steps::{
    SAGA_RECONCILE, STEP_ASSIGN_DRONE, STEP_ATTACH_DRONE, STEP_LOAD_DISPATCH_DATA,
    STEP_MARK_PENDING, STEP_PUBLISH_TASK,
};

/// Settings for [`ReconciliationWorker`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between two passes.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub dispatched: usize,
    /// Deliveries that left `awaiting_drone` while the pass was running.
    pub skipped: usize,
    pub failed: usize,
}

enum Dispatch {
    Dispatched,
    NoDrone,
    Skipped,
}

/// Periodically assigns free drones to deliveries in `awaiting_drone`.
pub struct ReconciliationWorker {
    repos: Repositories,
    publisher: Arc<dyn Publisher>,
    config: ReconcilerConfig,
}

impl ReconciliationWorker {
    pub fn new(
        repos: Repositories,
        publisher: Arc<dyn Publisher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            repos,
            publisher,
            config,
        }
    }

    /// Runs passes every `interval` until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        tracing::info!(interval = ?self.config.interval, "reconciliation worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.examined > 0 {
                        tracing::info!(
                            examined = report.examined,
                            dispatched = report.dispatched,
                            skipped = report.skipped,
                            failed = report.failed,
                            "reconciliation pass complete"
                        );
                    }
                }
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
        tracing::info!("reconciliation worker stopped");
    }

    /// Runs one pass over the waiting deliveries.
    ///
    /// Stops early once no drone is free. A delivery that fails to dispatch
    /// is put back to waiting and the pass moves on. One that is no longer
    /// waiting (cancelled or dispatched elsewhere) is skipped.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let waiting = match self
            .repos
            .deliveries
            .list_by_status(DeliveryStatus::AwaitingDrone)
            .await
        {
            Ok(waiting) => waiting,
            Err(err) => {
                tracing::warn!(error = %err, "listing waiting deliveries failed");
                return report;
            }
        };

        for delivery in waiting {
            report.examined += 1;
            match self.dispatch_one(&delivery).await {
                Ok(Dispatch::Dispatched) => {
                    report.dispatched += 1;
                    metrics::counter!("reconciler_dispatched_total").increment(1);
                }
                Ok(Dispatch::Skipped) => {
                    report.skipped += 1;
                    tracing::info!(delivery_id = %delivery.id, "delivery no longer waiting, skipped");
                }
                Ok(Dispatch::NoDrone) => {
                    tracing::debug!("no drone available, ending pass");
                    break;
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        delivery_id = %delivery.id,
                        error = %err,
                        "failed to dispatch waiting delivery"
                    );
                }
            }
        }
        report
    }

    async fn dispatch_one(&self, delivery: &Delivery) -> Result<Dispatch> {
        let Some(drone) = dispatch::acquire_drone(self.repos.drones.as_ref()).await? else {
            return Ok(Dispatch::NoDrone);
        };

        let mut compensations = Compensations::new(SAGA_RECONCILE);
        compensations.push(
            STEP_ASSIGN_DRONE,
            compensation::set_drone_status(&self.repos.drones, drone.id, DroneStatus::Idle),
        );

        // The list is a snapshot; claim the delivery before touching it.
        let claimed = compensations
            .step(
                STEP_MARK_PENDING,
                self.repos.deliveries.transition_status(
                    delivery.id,
                    DeliveryStatus::AwaitingDrone,
                    DeliveryStatus::Pending,
                ),
            )
            .await;
        match claimed {
            Ok(_) => {}
            Err(SagaError::Repository(err)) if err.is_conflict() => return Ok(Dispatch::Skipped),
            Err(err) => return Err(err),
        }
        compensations.push(
            STEP_MARK_PENDING,
            compensation::revert_delivery_status(
                &self.repos.deliveries,
                delivery.id,
                DeliveryStatus::Pending,
                DeliveryStatus::AwaitingDrone,
            ),
        );

        compensations
            .step(
                STEP_ATTACH_DRONE,
                self.repos.deliveries.update_drone(delivery.id, Some(drone.id)),
            )
            .await?;
        compensations.push(
            STEP_ATTACH_DRONE,
            compensation::detach_drone(&self.repos.deliveries, delivery.id),
        );

        let (order, good, automat) = compensations
            .step(STEP_LOAD_DISPATCH_DATA, async {
                let order = self.repos.orders.get(delivery.order_id).await?;
                let good = self.repos.goods.get(order.good_id).await?;
                let automat = self.repos.automats.get(delivery.parcel_automat_id).await?;
                Ok::<_, domain::RepositoryError>((order, good, automat))
            })
            .await?;

        let task = dispatch::build_task(
            &drone,
            &order,
            &good,
            &automat,
            delivery.internal_locker_cell_id,
        );
        compensations
            .step(
                STEP_PUBLISH_TASK,
                dispatch::publish_task(self.publisher.as_ref(), &task),
            )
            .await?;

        tracing::info!(
            delivery_id = %delivery.id,
            order_id = %order.id,
            drone_id = %drone.id,
            "drone assigned to waiting delivery"
        );
        Ok(Dispatch::Dispatched)
    }
}

impl std::fmt::Debug for ReconciliationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
