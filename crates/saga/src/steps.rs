//! Saga and step names used in logs and metrics.

/// Saga label: order creation.
pub const SAGA_CREATE_ORDER: &str = "create_order";

/// Saga label: drone assignment for a delivery waiting on a drone.
pub const SAGA_RECONCILE: &str = "reconcile_delivery";

pub const STEP_RESERVE_CELL: &str = "reserve_cell";
pub const STEP_RESERVE_STOCK: &str = "reserve_stock";
pub const STEP_RESERVE_INTERNAL_CELL: &str = "reserve_internal_cell";
pub const STEP_CREATE_ORDER: &str = "create_order";
pub const STEP_ASSIGN_DRONE: &str = "assign_drone";
pub const STEP_CREATE_DELIVERY: &str = "create_delivery";
pub const STEP_ATTACH_DRONE: &str = "attach_drone";
pub const STEP_MARK_PENDING: &str = "mark_pending";
pub const STEP_LOAD_DISPATCH_DATA: &str = "load_dispatch_data";
pub const STEP_PUBLISH_TASK: &str = "publish_task";

/// Attempts at a conditional reservation before giving up on a `Conflict`.
pub const MAX_RESERVE_ATTEMPTS: u32 = 3;
