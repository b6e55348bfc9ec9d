//! Delivery status changes and their effect on orders, cells and drones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CellId, DeliveryId, OrderId};
use domain::{CellStatus, Delivery, DeliveryStatus, DroneStatus, Order, OrderStatus};
use messaging::queues::CONFIRMATIONS;
use messaging::{BoxError, DeliveryConfirmation, MessageHandler, Transport};

use crate::error::{Result, SagaError};
use crate::repositories::Repositories;
use crate::services::DeliveryNotifier;

/// Default time allowed for processing one confirmation message.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies delivery status changes and keeps the order in step.
#[derive(Clone)]
pub struct DeliveryLifecycle {
    repos: Repositories,
    notifier: Option<Arc<dyn DeliveryNotifier>>,
}

impl DeliveryLifecycle {
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DeliveryNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn get(&self, delivery_id: DeliveryId) -> Result<Delivery> {
        Ok(self.repos.deliveries.get(delivery_id).await?)
    }

    pub async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<Delivery>> {
        Ok(self.repos.deliveries.list_by_status(status).await?)
    }

    /// Sets the status of a delivery from its string form.
    ///
    /// Unknown values are rejected with `InvalidDeliveryStatus` before
    /// anything is loaded.
    pub async fn update_status(&self, delivery_id: DeliveryId, status: &str) -> Result<Delivery> {
        let status: DeliveryStatus = status
            .parse()
            .map_err(|_| SagaError::InvalidDeliveryStatus(status.to_string()))?;
        self.update_status_to(delivery_id, status).await
    }

    /// Sets the status of a delivery and projects it onto the order.
    ///
    /// `failed` and `cancelled` also give back the drone and any cell that
    /// is still only reserved. `delivered` notifies the user.
    #[tracing::instrument(skip(self))]
    pub async fn update_status_to(
        &self,
        delivery_id: DeliveryId,
        status: DeliveryStatus,
    ) -> Result<Delivery> {
        let delivery = self.repos.deliveries.get(delivery_id).await?;
        let delivery = self
            .repos
            .deliveries
            .update_status(delivery.id, status)
            .await?;
        let order = self
            .repos
            .orders
            .update_status(delivery.order_id, status.order_status())
            .await?;

        tracing::info!(
            %delivery_id,
            order_id = %order.id,
            delivery_status = %status,
            order_status = %order.status,
            "delivery status updated"
        );

        match status {
            DeliveryStatus::Failed | DeliveryStatus::Cancelled => {
                self.release_reserved(&delivery, &order).await;
            }
            DeliveryStatus::Delivered => self.notify(&order).await,
            _ => {}
        }
        Ok(delivery)
    }

    /// Records that the drone put the good into the automat.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_goods_loaded(
        &self,
        order_id: OrderId,
        locker_cell_id: CellId,
    ) -> Result<()> {
        let delivery = match self.repos.deliveries.get_by_order(order_id).await {
            Ok(delivery) => delivery,
            Err(err) if err.is_not_found() => return Err(SagaError::DeliveryNotFound(order_id)),
            Err(err) => return Err(err.into()),
        };

        self.repos
            .deliveries
            .update_status(delivery.id, DeliveryStatus::Delivered)
            .await?;
        let order = self
            .repos
            .orders
            .update_status(order_id, OrderStatus::Delivered)
            .await?;

        self.repos
            .cells
            .update_status(locker_cell_id, CellStatus::Occupied)
            .await?;

        if let (Some(internal_cells), Some(internal_id)) = (
            self.repos.internal_cells.as_ref(),
            delivery.internal_locker_cell_id,
        ) && let Err(err) = internal_cells
            .update_status(internal_id, CellStatus::Occupied)
            .await
        {
            tracing::warn!(cell_id = %internal_id, error = %err, "failed to occupy internal cell");
        }

        tracing::info!(delivery_id = %delivery.id, %locker_cell_id, "goods loaded into locker");
        self.notify(&order).await;
        Ok(())
    }

    /// Frees the given locker cells after the user took their goods out.
    ///
    /// Each cell that holds goods becomes available again along with the
    /// internal cell of its delivery, and the order is completed. Cells that
    /// hold nothing are skipped. Returns the completed orders.
    #[tracing::instrument(skip(self, cell_ids), fields(cells = cell_ids.len()))]
    pub async fn confirm_pickup(&self, cell_ids: &[CellId]) -> Result<Vec<OrderId>> {
        let mut completed = Vec::with_capacity(cell_ids.len());
        let mut failed = 0;
        for &cell_id in cell_ids {
            match self.pick_up(cell_id).await {
                Ok(Some(order_id)) => completed.push(order_id),
                Ok(None) => {}
                Err(err) => {
                    failed += 1;
                    tracing::error!(%cell_id, error = %err, "pickup failed for cell");
                }
            }
        }

        if failed > 0 {
            return Err(SagaError::PartialPickupFailure {
                failed,
                total: cell_ids.len(),
            });
        }
        tracing::info!(completed = completed.len(), "pickup confirmed");
        Ok(completed)
    }

    async fn pick_up(&self, cell_id: CellId) -> Result<Option<OrderId>> {
        let cell = self.repos.cells.get(cell_id).await?;
        if !matches!(cell.status, CellStatus::Occupied | CellStatus::Opened) {
            tracing::warn!(%cell_id, status = %cell.status, "cell holds no goods, skipped");
            return Ok(None);
        }
        self.repos
            .cells
            .update_status(cell_id, CellStatus::Available)
            .await?;

        let order = match self.repos.orders.get_by_locker_cell(cell_id).await {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(%cell_id, error = %err, "no order for picked up cell");
                return Ok(None);
            }
        };

        match self.repos.deliveries.get_by_order(order.id).await {
            Ok(delivery) => {
                if let (Some(internal_cells), Some(internal_id)) = (
                    self.repos.internal_cells.as_ref(),
                    delivery.internal_locker_cell_id,
                ) && let Err(err) = internal_cells
                    .update_status(internal_id, CellStatus::Available)
                    .await
                {
                    tracing::warn!(cell_id = %internal_id, error = %err, "failed to free internal cell");
                }
            }
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "no delivery for picked up order");
            }
        }

        self.repos
            .orders
            .update_status(order.id, OrderStatus::Completed)
            .await?;
        tracing::debug!(%cell_id, order_id = %order.id, "order completed");
        Ok(Some(order.id))
    }

    /// Decodes and applies one confirmation message within `timeout`.
    pub async fn handle_confirmation(&self, body: &[u8], timeout: Duration) -> Result<()> {
        let confirmation: DeliveryConfirmation = serde_json::from_slice(body)?;
        tracing::debug!(
            order_id = %confirmation.order_id,
            automat_id = %confirmation.automat_id,
            "confirmation received"
        );
        tokio::time::timeout(
            timeout,
            self.confirm_goods_loaded(confirmation.order_id, confirmation.locker_cell_id),
        )
        .await
        .map_err(|_| SagaError::Timeout(timeout))?
    }

    /// Starts consuming the confirmations queue.
    pub async fn start_confirmation_consumer(
        self: &Arc<Self>,
        transport: &Transport,
        timeout: Duration,
    ) -> Result<()> {
        let handler = ConfirmationHandler {
            lifecycle: Arc::clone(self),
            timeout,
        };
        transport.consume(CONFIRMATIONS, Arc::new(handler)).await?;
        tracing::info!(queue = CONFIRMATIONS, "confirmation consumer started");
        Ok(())
    }

    async fn notify(&self, order: &Order) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier
            .notify_order_delivered(order.user_id, order.id, order.locker_cell_id)
            .await
        {
            tracing::warn!(order_id = %order.id, error = %err, "delivery notification failed");
        }
    }

    /// Frees what a cancelled or failed delivery was holding.
    ///
    /// Only resources still in their reserved state are touched, so cells a
    /// good already sits in and drones already reassigned are left alone.
    async fn release_reserved(&self, delivery: &Delivery, order: &Order) {
        if let Some(drone_id) = delivery.drone_id
            && let Err(err) = self
                .repos
                .drones
                .transition_status(drone_id, DroneStatus::Busy, DroneStatus::Idle)
                .await
            && !err.is_conflict()
        {
            tracing::warn!(%drone_id, error = %err, "failed to release drone");
        }

        if let Some(cell_id) = order.locker_cell_id
            && let Err(err) = self
                .repos
                .cells
                .transition_status(cell_id, CellStatus::Reserved, CellStatus::Available)
                .await
            && !err.is_conflict()
        {
            tracing::warn!(%cell_id, error = %err, "failed to release locker cell");
        }

        if let (Some(internal_cells), Some(cell_id)) = (
            self.repos.internal_cells.as_ref(),
            delivery.internal_locker_cell_id,
        ) && let Err(err) = internal_cells
            .transition_status(cell_id, CellStatus::Reserved, CellStatus::Available)
            .await
            && !err.is_conflict()
        {
            tracing::warn!(%cell_id, error = %err, "failed to release internal cell");
        }
    }
}

impl std::fmt::Debug for DeliveryLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryLifecycle")
            .field("repos", &self.repos)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

struct ConfirmationHandler {
    lifecycle: Arc<DeliveryLifecycle>,
    timeout: Duration,
}

#[async_trait]
impl MessageHandler for ConfirmationHandler {
    async fn handle(&self, body: &[u8]) -> std::result::Result<(), BoxError> {
        self.lifecycle
            .handle_confirmation(body, self.timeout)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "failed to process confirmation");
                BoxError::from(err)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryStores;
    use crate::services::InMemoryNotifier;
    use common::{AutomatId, UserId};
    use domain::{
        DeliveryRepository, Dimensions, Drone, Good, LockerCell, LockerCellRepository,
        OrderRepository, ParcelAutomat,
    };

    struct Fixture {
        stores: InMemoryStores,
        notifier: InMemoryNotifier,
        lifecycle: DeliveryLifecycle,
        order: Order,
        delivery: Delivery,
        cell: CellId,
        internal_cell: CellId,
        drone: common::DroneId,
    }

    async fn fixture(status: DeliveryStatus) -> Fixture {
        let stores = InMemoryStores::new();
        let automat = stores
            .automats
            .insert(ParcelAutomat::new("Kazan", "Baumana 5", "55.79,49.12", 3));
        let mut reserved = LockerCell::new(automat, 1, Dimensions::zero());
        reserved.status = CellStatus::Reserved;
        let cell = stores.cells.insert(reserved.clone());
        reserved.id = CellId::new();
        let internal_cell = stores.internal_cells.insert(reserved);
        let good = stores.goods.insert(Good::new("Lamp", Dimensions::zero(), 0));
        let mut drone = Drone::new("X500", "10.0.0.9");
        drone.status = DroneStatus::Busy;
        let drone = stores.drones.insert(drone);

        let order = stores
            .orders
            .create(Order::new(UserId::new(), good, automat, Some(cell)))
            .await
            .unwrap();
        let delivery = stores
            .deliveries
            .create(Delivery::new(
                order.id,
                Some(drone),
                automat,
                Some(internal_cell),
                status,
            ))
            .await
            .unwrap();

        let notifier = InMemoryNotifier::new();
        let lifecycle = DeliveryLifecycle::new(stores.repositories())
            .with_notifier(Arc::new(notifier.clone()));
        Fixture {
            stores,
            notifier,
            lifecycle,
            order,
            delivery,
            cell,
            internal_cell,
            drone,
        }
    }

    #[tokio::test]
    async fn test_every_status_projects_onto_order() {
        for &status in DeliveryStatus::ALL {
            let fx = fixture(DeliveryStatus::Pending).await;
            fx.lifecycle
                .update_status_to(fx.delivery.id, status)
                .await
                .unwrap();
            assert_eq!(
                fx.stores.orders.status_of(fx.order.id),
                Some(status.order_status()),
                "projection of {status}"
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_status_changes_nothing() {
        let fx = fixture(DeliveryStatus::Pending).await;
        let err = fx
            .lifecycle
            .update_status(fx.delivery.id, "teleported")
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InvalidDeliveryStatus(s) if s == "teleported"));
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_unknown_delivery_is_not_found() {
        let fx = fixture(DeliveryStatus::Pending).await;
        let err = fx
            .lifecycle
            .update_status(DeliveryId::new(), "in_transit")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delivered_notifies_user() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.lifecycle
            .update_status(fx.delivery.id, "delivered")
            .await
            .unwrap();
        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].order_id, fx.order.id);
        assert_eq!(sent[0].user_id, fx.order.user_id);
    }

    #[tokio::test]
    async fn test_failed_releases_drone_and_reserved_cells() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.lifecycle
            .update_status(fx.delivery.id, "failed")
            .await
            .unwrap();
        assert_eq!(fx.stores.drones.status_of(fx.drone), Some(DroneStatus::Idle));
        assert_eq!(
            fx.stores.cells.status_of(fx.cell),
            Some(CellStatus::Available)
        );
        assert_eq!(
            fx.stores.internal_cells.status_of(fx.internal_cell),
            Some(CellStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_cancel_leaves_occupied_cell_alone() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.stores
            .cells
            .update_status(fx.cell, CellStatus::Occupied)
            .await
            .unwrap();
        fx.lifecycle
            .update_status(fx.delivery.id, "cancelled")
            .await
            .unwrap();
        assert_eq!(
            fx.stores.cells.status_of(fx.cell),
            Some(CellStatus::Occupied)
        );
    }

    #[tokio::test]
    async fn test_confirm_goods_loaded() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.lifecycle
            .confirm_goods_loaded(fx.order.id, fx.cell)
            .await
            .unwrap();

        let delivery = fx.stores.deliveries.find_by_order(fx.order.id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Delivered)
        );
        assert_eq!(fx.stores.cells.status_of(fx.cell), Some(CellStatus::Occupied));
        assert_eq!(
            fx.stores.internal_cells.status_of(fx.internal_cell),
            Some(CellStatus::Occupied)
        );
        assert_eq!(fx.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_tolerates_internal_cell_and_notifier_failures() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.stores.internal_cells.set_fail_on("update_status", true);
        fx.notifier.set_fail_on_notify(true);

        fx.lifecycle
            .confirm_goods_loaded(fx.order.id, fx.cell)
            .await
            .unwrap();
        assert_eq!(fx.stores.cells.status_of(fx.cell), Some(CellStatus::Occupied));
    }

    #[tokio::test]
    async fn test_confirm_propagates_external_cell_failure() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.stores.cells.set_fail_on("update_status", true);
        let err = fx
            .lifecycle
            .confirm_goods_loaded(fx.order.id, fx.cell)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Repository(_)));
    }

    #[tokio::test]
    async fn test_confirm_unknown_order() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        let missing = OrderId::new();
        let err = fx
            .lifecycle
            .confirm_goods_loaded(missing, fx.cell)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::DeliveryNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_confirm_pickup_frees_cells_and_completes_order() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.lifecycle
            .confirm_goods_loaded(fx.order.id, fx.cell)
            .await
            .unwrap();

        let completed = fx.lifecycle.confirm_pickup(&[fx.cell]).await.unwrap();
        assert_eq!(completed, vec![fx.order.id]);
        assert_eq!(
            fx.stores.cells.status_of(fx.cell),
            Some(CellStatus::Available)
        );
        assert_eq!(
            fx.stores.internal_cells.status_of(fx.internal_cell),
            Some(CellStatus::Available)
        );
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_confirm_pickup_skips_cell_without_goods() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        let completed = fx.lifecycle.confirm_pickup(&[fx.cell]).await.unwrap();
        assert!(completed.is_empty());
        assert_eq!(fx.stores.cells.status_of(fx.cell), Some(CellStatus::Reserved));
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_confirm_pickup_reports_failed_cells_and_keeps_going() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        fx.lifecycle
            .confirm_goods_loaded(fx.order.id, fx.cell)
            .await
            .unwrap();

        let err = fx
            .lifecycle
            .confirm_pickup(&[CellId::new(), fx.cell])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SagaError::PartialPickupFailure {
                failed: 1,
                total: 2
            }
        ));
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_handle_confirmation_rejects_malformed_body() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        let err = fx
            .lifecycle
            .handle_confirmation(b"{\"order_id\": 7}", DEFAULT_CONFIRMATION_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_handle_confirmation_applies_message() {
        let fx = fixture(DeliveryStatus::InTransit).await;
        let body = serde_json::to_vec(&DeliveryConfirmation::new(
            fx.order.id,
            fx.cell,
            AutomatId::new(),
        ))
        .unwrap();
        fx.lifecycle
            .handle_confirmation(&body, DEFAULT_CONFIRMATION_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            fx.stores.orders.status_of(fx.order.id),
            Some(OrderStatus::Delivered)
        );
    }
}
