//! Delivery notifier trait and implementations.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CellId, OrderId, UserId};

use crate::error::SagaError;

/// Tells a user that their order is ready for pickup.
#[async_trait]
pub trait DeliveryNotifier: Send + Sync {
    async fn notify_order_delivered(
        &self,
        user_id: UserId,
        order_id: OrderId,
        locker_cell_id: Option<CellId>,
    ) -> Result<(), SagaError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl DeliveryNotifier for LogNotifier {
    async fn notify_order_delivered(
        &self,
        user_id: UserId,
        order_id: OrderId,
        locker_cell_id: Option<CellId>,
    ) -> Result<(), SagaError> {
        tracing::info!(%user_id, %order_id, ?locker_cell_id, "order delivered notification");
        Ok(())
    }
}

/// A notification recorded by [`InMemoryNotifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredNotification {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub locker_cell_id: Option<CellId>,
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<DeliveredNotification>,
    fail_on_notify: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every call.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_notify = fail;
    }

    /// Returns every notification sent so far.
    pub fn sent(&self) -> Vec<DeliveredNotification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }
}

#[async_trait]
impl DeliveryNotifier for InMemoryNotifier {
    async fn notify_order_delivered(
        &self,
        user_id: UserId,
        order_id: OrderId,
        locker_cell_id: Option<CellId>,
    ) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_notify {
            return Err(SagaError::Notification(
                "Push service unavailable".to_string(),
            ));
        }

        state.sent.push(DeliveredNotification {
            user_id,
            order_id,
            locker_cell_id,
        });
        Ok(())
    }
}
