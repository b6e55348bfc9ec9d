//! Integration tests for order creation, dispatch, confirmation and returns.

use std::sync::Arc;
use std::time::Duration;

use common::{CellId, DroneId, GoodId, OrderId, UserId};
use domain::{
    CellStatus, DeliveryRepository, DeliveryStatus, Dimensions, Drone, DroneStatus, Good,
    LockerCell, OrderStatus, ParcelAutomat,
};
use messaging::queues::{CONFIRMATIONS, DELIVERIES, DELIVERY_RETURN};
use messaging::{
    ConfirmMode, DeliveryConfirmation, DeliveryTask, InMemoryBroker, ReturnTask, Transport,
    TransportConfig,
};
use saga::{
    DeliveryLifecycle, InMemoryNotifier, InMemoryStores, OrderSaga, ReconcilerConfig,
    ReconciliationWorker, SagaError,
};

const CELL_SIZE: f64 = 40.0;

struct TestHarness {
    stores: InMemoryStores,
    broker: InMemoryBroker,
    transport: Arc<Transport>,
    notifier: InMemoryNotifier,
    saga: OrderSaga,
    lifecycle: Arc<DeliveryLifecycle>,
    worker: ReconciliationWorker,
    automat: common::AutomatId,
}

impl TestHarness {
    async fn new() -> Self {
        let stores = InMemoryStores::new();
        let broker = InMemoryBroker::new();
        let transport = Arc::new(
            Transport::connect(
                Arc::new(broker.clone()),
                TransportConfig {
                    confirm_timeout: Duration::from_millis(50),
                    reconnect_interval: Duration::from_millis(10),
                },
            )
            .await
            .unwrap(),
        );
        let notifier = InMemoryNotifier::new();

        let saga = OrderSaga::new(stores.repositories(), transport.clone());
        let lifecycle = Arc::new(
            DeliveryLifecycle::new(stores.repositories()).with_notifier(Arc::new(notifier.clone())),
        );
        let worker = ReconciliationWorker::new(
            stores.repositories(),
            transport.clone(),
            ReconcilerConfig::default(),
        );

        let automat = stores
            .automats
            .insert(ParcelAutomat::new("Moscow", "Arbat 12", "55.75,37.59", 21));

        Self {
            stores,
            broker,
            transport,
            notifier,
            saga,
            lifecycle,
            worker,
            automat,
        }
    }

    /// Adds `count` external cells and as many internal ones.
    fn add_cells(&self, count: u32) -> Vec<CellId> {
        let dims = Dimensions::new(10.0, CELL_SIZE, CELL_SIZE, CELL_SIZE);
        (1..=count)
            .map(|number| {
                self.stores
                    .internal_cells
                    .insert(LockerCell::new(self.automat, number, dims));
                self.stores
                    .cells
                    .insert(LockerCell::new(self.automat, number, dims))
            })
            .collect()
    }

    fn add_good(&self, quantity: i64) -> GoodId {
        self.stores.goods.insert(Good::new(
            "Headphones",
            Dimensions::new(0.4, 20.0, 20.0, 10.0),
            quantity,
        ))
    }

    fn add_drone(&self) -> DroneId {
        self.stores.drones.insert(Drone::new("X500", "10.0.0.5"))
    }

    fn published_tasks(&self) -> Vec<DeliveryTask> {
        self.broker
            .published(DELIVERIES)
            .iter()
            .map(|m| m.decode().unwrap())
            .collect()
    }

    fn delivery_status(&self, order_id: OrderId) -> Option<DeliveryStatus> {
        self.stores
            .deliveries
            .find_by_order(order_id)
            .map(|d| d.status)
    }
}

async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_order_is_dispatched_and_confirmed_end_to_end() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(2);
    let drone = h.add_drone();
    let user = UserId::new();

    h.lifecycle
        .start_confirmation_consumer(&h.transport, Duration::from_secs(1))
        .await
        .unwrap();

    let order = h.saga.create_order(user, good).await.unwrap();
    assert_eq!(order.locker_cell_id, Some(cells[0]));
    assert_eq!(h.stores.goods.quantity(good), Some(1));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Reserved));
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Busy));
    assert_eq!(h.delivery_status(order.id), Some(DeliveryStatus::Pending));

    let tasks = h.published_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].order_id, order.id);
    assert_eq!(tasks[0].drone_id, drone);
    assert_eq!(tasks[0].aruco_id, 21);
    assert_eq!(tasks[0].priority, 0);
    assert!(tasks[0].internal_locker_cell_id.is_some());

    h.broker
        .push_json(
            CONFIRMATIONS,
            &DeliveryConfirmation::new(order.id, cells[0], h.automat),
        )
        .unwrap();
    eventually(|| h.broker.acked(CONFIRMATIONS) == 1).await;

    assert_eq!(h.delivery_status(order.id), Some(DeliveryStatus::Delivered));
    assert_eq!(
        h.stores.orders.status_of(order.id),
        Some(OrderStatus::Delivered)
    );
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Occupied));
    let internal = tasks[0].internal_locker_cell_id.unwrap();
    assert_eq!(
        h.stores.internal_cells.status_of(internal),
        Some(CellStatus::Occupied)
    );

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, user);
    assert_eq!(sent[0].locker_cell_id, Some(cells[0]));

    let completed = h.lifecycle.confirm_pickup(&[cells[0]]).await.unwrap();
    assert_eq!(completed, vec![order.id]);
    assert_eq!(
        h.stores.orders.status_of(order.id),
        Some(OrderStatus::Completed)
    );
    assert_eq!(
        h.stores.cells.status_of(cells[0]),
        Some(CellStatus::Available)
    );
    assert_eq!(
        h.stores.internal_cells.status_of(internal),
        Some(CellStatus::Available)
    );
}

#[tokio::test]
async fn test_stock_failure_releases_cell() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(3);
    h.stores.goods.set_fail_on("adjust_quantity", true);

    let err = h.saga.create_order(UserId::new(), good).await.unwrap_err();

    assert!(matches!(err, SagaError::Repository(_)));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Available));
    assert_eq!(h.stores.goods.quantity(good), Some(3));
    assert_eq!(h.stores.orders.order_count(), 0);
}

#[tokio::test]
async fn test_order_failure_restocks_and_releases_cells() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(3);
    h.stores.orders.set_fail_on("create", true);

    h.saga.create_order(UserId::new(), good).await.unwrap_err();

    assert_eq!(h.stores.goods.quantity(good), Some(3));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Available));
    assert_eq!(h.stores.internal_cells.count_with_status(CellStatus::Reserved), 0);
    assert!(h.stores.deliveries.all().is_empty());
}

#[tokio::test]
async fn test_nacked_publish_unwinds_everything() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(3);
    let drone = h.add_drone();
    h.broker.set_confirm_mode(ConfirmMode::Nack);

    let err = h.saga.create_order(UserId::new(), good).await.unwrap_err();
    assert!(matches!(
        err,
        SagaError::Messaging(messaging::MessagingError::MessageNacked)
    ));

    assert_eq!(h.stores.goods.quantity(good), Some(3));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Available));
    assert_eq!(h.stores.internal_cells.count_with_status(CellStatus::Reserved), 0);
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Idle));

    let delivery = &h.stores.deliveries.all()[0];
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(
        h.stores.orders.status_of(delivery.order_id),
        Some(OrderStatus::Failed)
    );
}

#[tokio::test]
async fn test_publish_timeout_unwinds() {
    let h = TestHarness::new().await;
    h.add_cells(1);
    let good = h.add_good(1);
    let drone = h.add_drone();
    h.broker.set_confirm_mode(ConfirmMode::Silent);

    let err = h.saga.create_order(UserId::new(), good).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::Messaging(messaging::MessagingError::PublishTimeout)
    ));
    assert_eq!(h.stores.goods.quantity(good), Some(1));
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Idle));
}

#[tokio::test]
async fn test_without_drone_order_waits_then_worker_dispatches() {
    let h = TestHarness::new().await;
    h.add_cells(1);
    let good = h.add_good(1);

    let order = h.saga.create_order(UserId::new(), good).await.unwrap();
    assert_eq!(
        h.delivery_status(order.id),
        Some(DeliveryStatus::AwaitingDrone)
    );
    assert!(h.published_tasks().is_empty());

    let report = h.worker.tick().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(
        h.delivery_status(order.id),
        Some(DeliveryStatus::AwaitingDrone)
    );

    let drone = h.add_drone();
    let report = h.worker.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.delivery_status(order.id), Some(DeliveryStatus::Pending));
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Busy));

    let tasks = h.published_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].order_id, order.id);

    // Nothing left to reconcile.
    let report = h.worker.tick().await;
    assert_eq!(report.examined, 0);
    assert_eq!(h.published_tasks().len(), 1);
}

#[tokio::test]
async fn test_worker_leaves_delivery_waiting_when_publish_fails() {
    let h = TestHarness::new().await;
    h.add_cells(1);
    let good = h.add_good(1);
    let order = h.saga.create_order(UserId::new(), good).await.unwrap();

    let drone = h.add_drone();
    h.broker.set_confirm_mode(ConfirmMode::Nack);
    let report = h.worker.tick().await;

    assert_eq!(report.failed, 1);
    let delivery = h.stores.deliveries.find_by_order(order.id).unwrap();
    assert_eq!(delivery.status, DeliveryStatus::AwaitingDrone);
    assert_eq!(delivery.drone_id, None);
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Idle));
}

#[tokio::test]
async fn test_stock_and_cells_are_conserved() {
    let h = TestHarness::new().await;
    h.add_cells(3);
    let good = h.add_good(5);
    h.add_drone();
    let user = UserId::new();

    let mut created = Vec::new();
    for _ in 0..5 {
        if let Ok(order) = h.saga.create_order(user, good).await {
            created.push(order);
        }
    }

    // Three cells, so only three orders fit.
    assert_eq!(created.len(), 3);
    let remaining = h.stores.goods.quantity(good).unwrap();
    assert_eq!(remaining + created.len() as i64, 5);
    assert_eq!(
        h.stores.cells.count_with_status(CellStatus::Reserved),
        created.len()
    );
    assert_eq!(h.stores.cells.count_with_status(CellStatus::Available), 0);

    h.saga.return_order(created[0].id, user).await.unwrap();
    assert_eq!(h.stores.goods.quantity(good), Some(remaining + 1));
    assert_eq!(h.stores.cells.count_with_status(CellStatus::Available), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_share_a_cell_or_drone() {
    let h = TestHarness::new().await;
    h.add_cells(4);
    let good = h.add_good(10);
    h.add_drone();
    h.add_drone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let saga = h.saga.clone();
            tokio::spawn(async move { saga.create_order(UserId::new(), good).await })
        })
        .collect();

    let mut orders = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => orders.push(order),
            Err(err) => assert!(matches!(err, SagaError::NoAvailableCell), "{err}"),
        }
    }

    // Every order holds its own cell and one unit of stock.
    assert!(!orders.is_empty() && orders.len() <= 4);
    let mut cells: Vec<_> = orders.iter().filter_map(|o| o.locker_cell_id).collect();
    cells.sort();
    cells.dedup();
    assert_eq!(cells.len(), orders.len());
    assert_eq!(
        h.stores.cells.count_with_status(CellStatus::Reserved),
        orders.len()
    );
    assert_eq!(
        h.stores.goods.quantity(good),
        Some(10 - orders.len() as i64)
    );

    // A drone is never attached to two deliveries.
    let deliveries = h.stores.deliveries.all();
    assert_eq!(deliveries.len(), orders.len());
    let mut drones: Vec<_> = deliveries.iter().filter_map(|d| d.drone_id).collect();
    let assigned = drones.len();
    drones.sort();
    drones.dedup();
    assert_eq!(drones.len(), assigned);
    assert!(assigned <= 2);
    for drone in &drones {
        assert_eq!(h.stores.drones.status_of(*drone), Some(DroneStatus::Busy));
    }
    let waiting = deliveries
        .iter()
        .filter(|d| d.status == DeliveryStatus::AwaitingDrone)
        .count();
    assert_eq!(waiting + assigned, orders.len());

    let mut internal: Vec<_> = deliveries
        .iter()
        .filter_map(|d| d.internal_locker_cell_id)
        .collect();
    let reserved_internal = internal.len();
    internal.sort();
    internal.dedup();
    assert_eq!(internal.len(), reserved_internal);
}

#[tokio::test]
async fn test_return_recalls_drone_and_frees_resources() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(1);
    let drone = h.add_drone();
    let user = UserId::new();
    let order = h.saga.create_order(user, good).await.unwrap();
    let internal = h
        .stores
        .deliveries
        .find_by_order(order.id)
        .and_then(|d| d.internal_locker_cell_id)
        .unwrap();

    h.saga.return_order(order.id, user).await.unwrap();

    let returns = h.broker.published(DELIVERY_RETURN);
    assert_eq!(returns.len(), 1);
    let task: ReturnTask = returns[0].decode().unwrap();
    assert_eq!(task.drone_id, drone);
    assert_eq!(task.base_marker_id, 131);
    assert_eq!(task.priority, 10);

    assert_eq!(h.delivery_status(order.id), Some(DeliveryStatus::Cancelled));
    assert_eq!(
        h.stores.orders.status_of(order.id),
        Some(OrderStatus::Cancelled)
    );
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Returning));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Available));
    assert_eq!(
        h.stores.internal_cells.status_of(internal),
        Some(CellStatus::Available)
    );
    assert_eq!(h.stores.goods.quantity(good), Some(1));
}

#[tokio::test]
async fn test_return_proceeds_when_recall_cannot_be_published() {
    let h = TestHarness::new().await;
    h.add_cells(1);
    let good = h.add_good(1);
    h.add_drone();
    let user = UserId::new();
    let order = h.saga.create_order(user, good).await.unwrap();

    h.broker.set_confirm_mode(ConfirmMode::Nack);
    h.saga.return_order(order.id, user).await.unwrap();

    assert_eq!(
        h.stores.orders.status_of(order.id),
        Some(OrderStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_return_of_waiting_order_cancels_delivery() {
    let h = TestHarness::new().await;
    h.add_cells(1);
    let good = h.add_good(1);
    let user = UserId::new();
    let order = h.saga.create_order(user, good).await.unwrap();

    h.saga.return_order(order.id, user).await.unwrap();

    assert!(h.broker.published(DELIVERY_RETURN).is_empty());
    assert_eq!(h.delivery_status(order.id), Some(DeliveryStatus::Cancelled));
    assert_eq!(h.worker.tick().await.examined, 0);
}

#[tokio::test]
async fn test_batch_creates_what_it_can() {
    let h = TestHarness::new().await;
    h.add_cells(2);
    let in_stock = h.add_good(1);
    let sold_out = h.add_good(0);
    let user = UserId::new();

    let orders = h
        .saga
        .create_multiple_orders(user, &[in_stock, sold_out])
        .await
        .unwrap();

    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].good_id, in_stock);
    assert_eq!(h.saga.list_user_orders(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_status_update_projects_and_releases() {
    let h = TestHarness::new().await;
    let cells = h.add_cells(1);
    let good = h.add_good(1);
    let drone = h.add_drone();
    let order = h.saga.create_order(UserId::new(), good).await.unwrap();
    let delivery = h.stores.deliveries.find_by_order(order.id).unwrap();

    h.lifecycle
        .update_status(delivery.id, "in_transit")
        .await
        .unwrap();
    assert_eq!(
        h.stores.orders.status_of(order.id),
        Some(OrderStatus::InProgress)
    );

    let err = h
        .lifecycle
        .update_status(delivery.id, "lost_at_sea")
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InvalidDeliveryStatus(_)));

    h.lifecycle
        .update_status(delivery.id, "failed")
        .await
        .unwrap();
    assert_eq!(h.stores.orders.status_of(order.id), Some(OrderStatus::Failed));
    assert_eq!(h.stores.drones.status_of(drone), Some(DroneStatus::Idle));
    assert_eq!(h.stores.cells.status_of(cells[0]), Some(CellStatus::Available));
}

#[tokio::test]
async fn test_malformed_confirmation_is_nacked() {
    let h = TestHarness::new().await;
    h.lifecycle
        .start_confirmation_consumer(&h.transport, Duration::from_secs(1))
        .await
        .unwrap();

    h.broker.push(CONFIRMATIONS, b"not json".to_vec());

    eventually(|| h.broker.nacked(CONFIRMATIONS) >= 1).await;
    assert_eq!(h.broker.acked(CONFIRMATIONS), 0);
    h.transport.close().await.unwrap();
}

#[tokio::test]
async fn test_confirmation_for_unknown_order_is_nacked() {
    let h = TestHarness::new().await;
    h.lifecycle
        .start_confirmation_consumer(&h.transport, Duration::from_secs(1))
        .await
        .unwrap();

    h.broker
        .push_json(
            CONFIRMATIONS,
            &DeliveryConfirmation::new(OrderId::new(), CellId::new(), h.automat),
        )
        .unwrap();

    eventually(|| h.broker.nacked(CONFIRMATIONS) >= 1).await;
    h.transport.close().await.unwrap();
}

#[tokio::test]
async fn test_delivery_queries() {
    let h = TestHarness::new().await;
    h.add_cells(2);
    let good = h.add_good(2);
    let order = h.saga.create_order(UserId::new(), good).await.unwrap();
    h.saga.create_order(UserId::new(), good).await.unwrap();

    let waiting = h
        .lifecycle
        .list_by_status(DeliveryStatus::AwaitingDrone)
        .await
        .unwrap();
    assert_eq!(waiting.len(), 2);

    let delivery = h.stores.deliveries.get_by_order(order.id).await.unwrap();
    assert_eq!(h.lifecycle.get(delivery.id).await.unwrap(), delivery);
    assert_eq!(h.saga.get_order(order.id).await.unwrap().id, order.id);
}
