//! Order saga and delivery orchestration for the drone delivery service.
//!
//! This crate provides:
//! - [`OrderSaga`]: order creation with compensations, batch orders and returns
//! - [`DeliveryLifecycle`]: delivery status changes projected onto orders,
//!   plus the consumer for locker confirmations
//! - [`ReconciliationWorker`]: periodic dispatch of deliveries waiting for a drone
//!
//! Order creation walks these steps:
//! 1. Reserve a locker cell that fits the good
//! 2. Take one unit of stock
//! 3. Reserve an internal transfer cell (best-effort)
//! 4. Create the order
//! 5. Assign an idle drone, create the delivery and publish the task
//!
//! If any step fails, previously completed steps are compensated in reverse order.
//! Without a free drone the delivery is left in `awaiting_drone` for the worker.

pub mod compensation;
pub mod coordinator;
mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod repositories;
pub mod services;
pub mod steps;

pub use compensation::Compensations;
pub use coordinator::OrderSaga;
pub use error::{Result, SagaError};
pub use lifecycle::{DEFAULT_CONFIRMATION_TIMEOUT, DeliveryLifecycle};
pub use reconciler::{ReconcileReport, ReconcilerConfig, ReconciliationWorker};
pub use repositories::{InMemoryStores, Repositories};
pub use services::{DeliveredNotification, DeliveryNotifier, InMemoryNotifier, LogNotifier};
