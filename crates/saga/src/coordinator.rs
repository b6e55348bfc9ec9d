//! Order saga: creating and returning orders.

use std::sync::Arc;

use common::{AutomatId, CellId, GoodId, OrderId, UserId};
use domain::{
    CellStatus, Delivery, DeliveryStatus, Dimensions, DroneStatus, Good, LockerCell, Order,
    OrderStatus, ParcelAutomat, RepositoryError,
};
use messaging::queues::DELIVERY_RETURN;
use messaging::{Publisher, PublisherExt, ReturnTask};

use crate::compensation::{self, Compensations};
use crate::dispatch;
use crate::error::{Result, SagaError};
use crate::repositories::Repositories;
use crate::steps::{
    MAX_RESERVE_ATTEMPTS, SAGA_CREATE_ORDER, STEP_ASSIGN_DRONE, STEP_CREATE_DELIVERY,
    STEP_CREATE_ORDER, STEP_PUBLISH_TASK, STEP_RESERVE_INTERNAL_CELL, STEP_RESERVE_CELL,
    STEP_RESERVE_STOCK,
};

/// Orchestrates order creation and returns.
///
/// Creating an order reserves a locker cell and a unit of stock, optionally
/// an internal transfer cell, creates the order and its delivery, and tries
/// to dispatch a drone right away. Any failure after the first reservation
/// unwinds everything reserved so far.
#[derive(Clone)]
pub struct OrderSaga {
    repos: Repositories,
    publisher: Arc<dyn Publisher>,
}

impl OrderSaga {
    pub fn new(repos: Repositories, publisher: Arc<dyn Publisher>) -> Self {
        Self { repos, publisher }
    }

    /// Creates an order for one unit of a good.
    ///
    /// When no drone is free the order is still created and its delivery is
    /// left awaiting a drone for the reconciliation worker.
    #[tracing::instrument(skip(self), fields(saga = SAGA_CREATE_ORDER))]
    pub async fn create_order(&self, user_id: UserId, good_id: GoodId) -> Result<Order> {
        let saga_start = std::time::Instant::now();
        let result = self.run_create_order(user_id, good_id).await;
        metrics::histogram!("saga_duration_seconds", "saga" => SAGA_CREATE_ORDER)
            .record(saga_start.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(order_id = %order.id, "order created");
            }
            Err(err) => {
                metrics::counter!("orders_failed_total", "reason" => err.kind()).increment(1);
                tracing::warn!(error = %err, "order creation failed");
            }
        }
        result
    }

    async fn run_create_order(&self, user_id: UserId, good_id: GoodId) -> Result<Order> {
        let good = self.repos.goods.get(good_id).await?;
        if !good.in_stock() {
            return Err(SagaError::GoodOutOfStock);
        }

        let automat = self.first_working_automat().await?;

        let mut compensations = Compensations::new(SAGA_CREATE_ORDER);

        let cell = self.reserve_cell(&good).await?;
        compensations.push(
            STEP_RESERVE_CELL,
            compensation::release_cell(&self.repos.cells, cell.id),
        );

        compensations
            .step(STEP_RESERVE_STOCK, async {
                match self.repos.goods.adjust_quantity(good.id, -1).await {
                    // Someone else took the last unit since we looked.
                    Err(RepositoryError::InsufficientStock { .. }) => Err(SagaError::GoodOutOfStock),
                    other => other.map_err(SagaError::from),
                }
            })
            .await?;
        compensations.push(
            STEP_RESERVE_STOCK,
            compensation::restock(&self.repos.goods, good.id),
        );

        let internal_cell = match self.reserve_internal_cell(automat.id, cell.id).await {
            Ok(reserved) => reserved,
            Err(err) => {
                tracing::warn!(
                    automat_id = %automat.id,
                    cell_id = %cell.id,
                    error = %err,
                    "internal cell reservation failed, continuing without one"
                );
                None
            }
        };
        if let (Some(internal_id), Some(internal_cells)) =
            (internal_cell, self.repos.internal_cells.as_ref())
        {
            compensations.push(
                STEP_RESERVE_INTERNAL_CELL,
                compensation::release_cell(internal_cells, internal_id),
            );
        }

        let order = compensations
            .step(
                STEP_CREATE_ORDER,
                self.repos
                    .orders
                    .create(Order::new(user_id, good.id, automat.id, Some(cell.id))),
            )
            .await?;
        compensations.push(
            STEP_CREATE_ORDER,
            compensation::set_order_status(&self.repos.orders, order.id, OrderStatus::Failed),
        );

        let drone = compensations
            .step(
                STEP_ASSIGN_DRONE,
                dispatch::acquire_drone(self.repos.drones.as_ref()),
            )
            .await?;

        let Some(drone) = drone else {
            compensations
                .step(
                    STEP_CREATE_DELIVERY,
                    self.repos.deliveries.create(Delivery::new(
                        order.id,
                        None,
                        automat.id,
                        internal_cell,
                        DeliveryStatus::AwaitingDrone,
                    )),
                )
                .await?;
            tracing::info!(order_id = %order.id, "no drone available, delivery awaiting drone");
            return Ok(order);
        };
        compensations.push(
            STEP_ASSIGN_DRONE,
            compensation::set_drone_status(&self.repos.drones, drone.id, DroneStatus::Idle),
        );

        let delivery = compensations
            .step(
                STEP_CREATE_DELIVERY,
                self.repos.deliveries.create(Delivery::new(
                    order.id,
                    Some(drone.id),
                    automat.id,
                    internal_cell,
                    DeliveryStatus::Pending,
                )),
            )
            .await?;
        compensations.push(
            STEP_CREATE_DELIVERY,
            compensation::set_delivery_status(
                &self.repos.deliveries,
                delivery.id,
                DeliveryStatus::Failed,
            ),
        );

        let task = dispatch::build_task(&drone, &order, &good, &automat, internal_cell);
        compensations
            .step(
                STEP_PUBLISH_TASK,
                dispatch::publish_task(self.publisher.as_ref(), &task),
            )
            .await?;

        tracing::info!(
            order_id = %order.id,
            delivery_id = %delivery.id,
            drone_id = %drone.id,
            "drone assigned to order"
        );
        Ok(order)
    }

    async fn first_working_automat(&self) -> Result<ParcelAutomat> {
        match self.repos.automats.list_working().await {
            Ok(automats) => automats
                .into_iter()
                .next()
                .ok_or(SagaError::NoWorkingAutomats),
            Err(err) => {
                tracing::warn!(error = %err, "listing working automats failed");
                Err(SagaError::NoWorkingAutomats)
            }
        }
    }

    /// Finds a fitting cell and moves it from available to reserved.
    async fn reserve_cell(&self, good: &Good) -> Result<LockerCell> {
        for attempt in 1..=MAX_RESERVE_ATTEMPTS {
            let cell = self
                .repos
                .cells
                .find_available(&good.dimensions)
                .await?
                .ok_or(SagaError::NoAvailableCell)?;

            match self
                .repos
                .cells
                .transition_status(cell.id, CellStatus::Available, CellStatus::Reserved)
                .await
            {
                Ok(()) => return Ok(cell),
                Err(err) if err.is_conflict() => {
                    tracing::debug!(attempt, cell_id = %cell.id, "cell reserved concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SagaError::NoAvailableCell)
    }

    /// Reserves the internal cell paired with `external_cell`.
    ///
    /// When both pools of the automat have the same size the internal cell
    /// at the same position is preferred; otherwise (or if that one is not
    /// available) any available internal cell is taken.
    async fn reserve_internal_cell(
        &self,
        automat_id: AutomatId,
        external_cell: CellId,
    ) -> Result<Option<CellId>> {
        let Some(internal_cells) = self.repos.internal_cells.as_ref() else {
            return Ok(None);
        };

        let external = self.repos.cells.list_by_automat(automat_id).await?;
        let internal = internal_cells.list_by_automat(automat_id).await?;

        if external.len() == internal.len()
            && let Some(position) = external.iter().position(|c| c.id == external_cell)
            && internal[position].status == CellStatus::Available
        {
            let paired = internal[position].id;
            internal_cells
                .transition_status(paired, CellStatus::Available, CellStatus::Reserved)
                .await?;
            return Ok(Some(paired));
        }

        let Some(fallback) = internal_cells.find_available(&Dimensions::zero()).await? else {
            tracing::debug!(%automat_id, "no internal cell available");
            return Ok(None);
        };
        internal_cells
            .transition_status(fallback.id, CellStatus::Available, CellStatus::Reserved)
            .await?;
        Ok(Some(fallback.id))
    }

    /// Creates one order per good; each runs as an independent saga.
    ///
    /// Fails only if no order could be created, with the last error seen.
    #[tracing::instrument(skip(self, good_ids), fields(count = good_ids.len()))]
    pub async fn create_multiple_orders(
        &self,
        user_id: UserId,
        good_ids: &[GoodId],
    ) -> Result<Vec<Order>> {
        let mut orders = Vec::with_capacity(good_ids.len());
        let mut last_error = None;

        for &good_id in good_ids {
            match self.create_order(user_id, good_id).await {
                Ok(order) => orders.push(order),
                Err(err) => last_error = Some(err),
            }
        }

        if orders.is_empty() {
            return Err(last_error.unwrap_or(SagaError::NoOrdersCreated));
        }
        Ok(orders)
    }

    /// Cancels a pending or in-progress order on behalf of its owner.
    ///
    /// Recalls the drone if it is already assigned, frees the cells and
    /// restocks the good. Steps are applied in order without compensation,
    /// so a failure partway leaves earlier steps applied.
    #[tracing::instrument(skip(self))]
    pub async fn return_order(&self, order_id: OrderId, user_id: UserId) -> Result<()> {
        let order = self.repos.orders.get(order_id).await?;
        if order.user_id != user_id {
            return Err(SagaError::OrderNotOwned);
        }
        if !order.status.is_returnable() {
            return Err(SagaError::OrderNotReturnable);
        }

        let delivery = match self.repos.deliveries.get_by_order(order_id).await {
            Ok(delivery) => Some(delivery),
            Err(err) => {
                tracing::warn!(error = %err, "no delivery found for returned order");
                None
            }
        };

        if let Some(delivery) = &delivery {
            if let Some(drone_id) = delivery.drone_id
                && delivery.status.is_active_flight()
            {
                let task = ReturnTask::new(drone_id, Some(delivery.id));
                if let Err(err) = self.publisher.publish(DELIVERY_RETURN, &task).await {
                    tracing::error!(%drone_id, error = %err, "failed to publish return task");
                }
            }

            self.repos
                .deliveries
                .update_status(delivery.id, DeliveryStatus::Cancelled)
                .await?;

            if let Some(drone_id) = delivery.drone_id
                && let Err(err) = self
                    .repos
                    .drones
                    .update_status(drone_id, DroneStatus::Returning)
                    .await
            {
                tracing::warn!(%drone_id, error = %err, "failed to mark drone returning");
            }
        }

        if let Some(cell_id) = order.locker_cell_id {
            self.repos
                .cells
                .update_status(cell_id, CellStatus::Available)
                .await?;
        }

        if let (Some(internal_cells), Some(cell_id)) = (
            self.repos.internal_cells.as_ref(),
            delivery.as_ref().and_then(|d| d.internal_locker_cell_id),
        ) && let Err(err) = internal_cells
            .update_status(cell_id, CellStatus::Available)
            .await
        {
            tracing::warn!(%cell_id, error = %err, "failed to release internal cell");
        }

        self.repos.goods.adjust_quantity(order.good_id, 1).await?;
        self.repos
            .orders
            .update_status(order_id, OrderStatus::Cancelled)
            .await?;

        tracing::info!("order returned");
        Ok(())
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.repos.orders.get(order_id).await?)
    }

    /// Lists a user's orders, newest first.
    pub async fn list_user_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.repos.orders.list_by_user(user_id).await?)
    }
}

impl std::fmt::Debug for OrderSaga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSaga")
            .field("repos", &self.repos)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryStores;
    use async_trait::async_trait;
    use domain::{Drone, GoodRepository, OrderRepository, ParcelAutomatRepository};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish_bytes(&self, queue: &str, _body: Vec<u8>) -> messaging::Result<()> {
            self.sent.lock().unwrap().push(queue.to_string());
            Ok(())
        }
    }

    fn seeded() -> (InMemoryStores, GoodId) {
        let stores = InMemoryStores::new();
        let automat = stores
            .automats
            .insert(ParcelAutomat::new("Moscow", "Tverskaya 1", "55.75,37.61", 7));
        stores
            .cells
            .insert(LockerCell::new(automat, 1, Dimensions::new(5.0, 30.0, 30.0, 30.0)));
        stores
            .internal_cells
            .insert(LockerCell::new(automat, 1, Dimensions::new(5.0, 30.0, 30.0, 30.0)));
        let good = stores.goods.insert(Good::new(
            "Kettle",
            Dimensions::new(1.0, 20.0, 20.0, 20.0),
            1,
        ));
        (stores, good)
    }

    fn saga(stores: &InMemoryStores) -> (OrderSaga, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        (
            OrderSaga::new(stores.repositories(), publisher.clone()),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_out_of_stock_is_rejected_before_reserving() {
        let (stores, good) = seeded();
        stores.goods.adjust_quantity(good, -1).await.unwrap();
        let (saga, _) = saga(&stores);

        let err = saga.create_order(UserId::new(), good).await.unwrap_err();
        assert!(matches!(err, SagaError::GoodOutOfStock));
        assert_eq!(stores.cells.count_with_status(CellStatus::Available), 1);
        assert_eq!(stores.orders.order_count(), 0);
    }

    #[tokio::test]
    async fn test_no_working_automat() {
        let stores = InMemoryStores::new();
        let good = stores
            .goods
            .insert(Good::new("Kettle", Dimensions::zero(), 3));
        let (saga, _) = saga(&stores);

        let err = saga.create_order(UserId::new(), good).await.unwrap_err();
        assert!(matches!(err, SagaError::NoWorkingAutomats));
    }

    #[tokio::test]
    async fn test_no_fitting_cell() {
        let (stores, _) = seeded();
        let bulky = stores.goods.insert(Good::new(
            "Wardrobe",
            Dimensions::new(80.0, 200.0, 100.0, 60.0),
            1,
        ));
        let (saga, _) = saga(&stores);

        let err = saga.create_order(UserId::new(), bulky).await.unwrap_err();
        assert!(matches!(err, SagaError::NoAvailableCell));
        assert_eq!(stores.goods.quantity(bulky), Some(1));
    }

    #[tokio::test]
    async fn test_dispatches_when_drone_available() {
        let (stores, good) = seeded();
        let drone = stores.drones.insert(Drone::new("X500", "10.0.0.5"));
        let (saga, publisher) = saga(&stores);

        let order = saga.create_order(UserId::new(), good).await.unwrap();

        assert_eq!(stores.orders.status_of(order.id), Some(OrderStatus::Pending));
        assert_eq!(stores.drones.status_of(drone), Some(DroneStatus::Busy));
        assert_eq!(stores.goods.quantity(good), Some(0));
        let delivery = stores.deliveries.find_by_order(order.id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.drone_id, Some(drone));
        assert!(delivery.internal_locker_cell_id.is_some());
        assert_eq!(
            *publisher.sent.lock().unwrap(),
            vec![messaging::queues::DELIVERIES.to_string()]
        );
    }

    #[tokio::test]
    async fn test_without_drone_delivery_awaits() {
        let (stores, good) = seeded();
        let (saga, publisher) = saga(&stores);

        let order = saga.create_order(UserId::new(), good).await.unwrap();

        let delivery = stores.deliveries.find_by_order(order.id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::AwaitingDrone);
        assert_eq!(delivery.drone_id, None);
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_internal_cell_failure_is_not_fatal() {
        let (stores, good) = seeded();
        stores.internal_cells.set_fail_on("list_by_automat", true);
        let (saga, _) = saga(&stores);

        let order = saga.create_order(UserId::new(), good).await.unwrap();

        let delivery = stores.deliveries.find_by_order(order.id).unwrap();
        assert_eq!(delivery.internal_locker_cell_id, None);
    }

    #[tokio::test]
    async fn test_batch_reports_last_error_when_nothing_created() {
        let (stores, good) = seeded();
        stores.goods.adjust_quantity(good, -1).await.unwrap();
        let (saga, _) = saga(&stores);

        let err = saga
            .create_multiple_orders(UserId::new(), &[good, good])
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::GoodOutOfStock));

        let err = saga
            .create_multiple_orders(UserId::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::NoOrdersCreated));
    }

    #[tokio::test]
    async fn test_return_checks_owner_and_status() {
        let (stores, good) = seeded();
        let (saga, _) = saga(&stores);
        let owner = UserId::new();
        let order = saga.create_order(owner, good).await.unwrap();

        let err = saga.return_order(order.id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, SagaError::OrderNotOwned));

        stores
            .orders
            .update_status(order.id, OrderStatus::Delivered)
            .await
            .unwrap();
        let err = saga.return_order(order.id, owner).await.unwrap_err();
        assert!(matches!(err, SagaError::OrderNotReturnable));
    }

    #[tokio::test]
    async fn test_list_user_orders() {
        let (stores, good) = seeded();
        stores.goods.adjust_quantity(good, 1).await.unwrap();
        stores.cells.insert(LockerCell::new(
            stores.automats.list_working().await.unwrap()[0].id,
            2,
            Dimensions::new(5.0, 30.0, 30.0, 30.0),
        ));
        let (saga, _) = saga(&stores);
        let user = UserId::new();

        saga.create_order(user, good).await.unwrap();
        saga.create_order(user, good).await.unwrap();
        saga.create_order(UserId::new(), good).await.unwrap_err();

        assert_eq!(saga.list_user_orders(user).await.unwrap().len(), 2);
        assert!(saga.list_user_orders(UserId::new()).await.unwrap().is_empty());
    }
}
