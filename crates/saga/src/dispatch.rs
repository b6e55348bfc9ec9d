//! Drone acquisition and task publishing shared by the saga and the worker.

use chrono::Utc;
use common::CellId;
use domain::{Drone, DroneRepository, DroneStatus, Good, Order, ParcelAutomat};
use messaging::queues::delivery_queue_for;
use messaging::{DeliveryTask, Publisher, PublisherExt};

use crate::error::Result;
use crate::steps::MAX_RESERVE_ATTEMPTS;

/// Priority of freshly created delivery tasks.
pub(crate) const TASK_PRIORITY: u8 = 0;

/// Takes an idle drone and marks it busy.
///
/// Returns `None` when no drone is available, including when the lookup
/// itself fails. A drone grabbed concurrently by someone else is skipped.
pub(crate) async fn acquire_drone(drones: &dyn DroneRepository) -> Result<Option<Drone>> {
    for attempt in 1..=MAX_RESERVE_ATTEMPTS {
        let mut drone = match drones.get_available().await {
            Ok(Some(drone)) => drone,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(error = %err, "drone lookup failed, treating as none available");
                return Ok(None);
            }
        };

        match drones
            .transition_status(drone.id, DroneStatus::Idle, DroneStatus::Busy)
            .await
        {
            Ok(()) => {
                drone.status = DroneStatus::Busy;
                return Ok(Some(drone));
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(attempt, drone_id = %drone.id, "drone taken concurrently, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

pub(crate) fn build_task(
    drone: &Drone,
    order: &Order,
    good: &Good,
    automat: &ParcelAutomat,
    internal_locker_cell_id: Option<CellId>,
) -> DeliveryTask {
    DeliveryTask {
        drone_id: drone.id,
        drone_ip: drone.ip_address.clone(),
        order_id: order.id,
        good_id: good.id,
        parcel_automat_id: automat.id,
        internal_locker_cell_id,
        aruco_id: automat.aruco_id,
        coordinates: automat.coordinates.clone(),
        weight: good.dimensions.weight,
        height: good.dimensions.height,
        length: good.dimensions.length,
        width: good.dimensions.width,
        priority: TASK_PRIORITY,
        created_at: Utc::now().timestamp(),
    }
}

/// Publishes a task to the queue matching its priority.
pub(crate) async fn publish_task(publisher: &dyn Publisher, task: &DeliveryTask) -> Result<()> {
    let queue = delivery_queue_for(task.priority);
    publisher.publish(queue, task).await?;
    tracing::info!(
        queue,
        order_id = %task.order_id,
        drone_id = %task.drone_id,
        "delivery task published"
    );
    Ok(())
}
