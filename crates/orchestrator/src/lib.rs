//! HTTP API and process wiring for the drone delivery orchestrator.
//!
//! Provides REST endpoints for placing and returning orders, reporting
//! delivery status and confirming pickups, plus a small admin surface for
//! registering goods, automats, cells and drones. Logging goes through
//! tracing and metrics through Prometheus.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use messaging::Transport;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{DeliveryLifecycle, DeliveryNotifier, OrderSaga, Repositories};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub repos: Repositories,
    pub saga: OrderSaga,
    pub lifecycle: Arc<DeliveryLifecycle>,
    pub transport: Arc<Transport>,
}

impl AppState {
    /// Wires the saga and the lifecycle manager to one set of repositories.
    pub fn new(
        repos: Repositories,
        transport: Arc<Transport>,
        notifier: Arc<dyn DeliveryNotifier>,
    ) -> Self {
        Self {
            saga: OrderSaga::new(repos.clone(), transport.clone()),
            lifecycle: Arc::new(DeliveryLifecycle::new(repos.clone()).with_notifier(notifier)),
            repos,
            transport,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/batch", post(routes::orders::create_batch))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/return", post(routes::orders::return_order))
        .route("/users/{user_id}/orders", get(routes::orders::list_for_user))
        .route("/goods", post(routes::admin::create_good))
        .route("/drones", post(routes::admin::create_drone))
        .route("/automats", post(routes::admin::create_automat))
        .route("/automats/{id}/cells", post(routes::admin::create_cell))
        .route(
            "/automats/confirm-pickup",
            post(routes::automats::confirm_pickup),
        )
        .route("/deliveries", get(routes::deliveries::list))
        .route("/deliveries/{id}", get(routes::deliveries::get))
        .route(
            "/deliveries/{id}/status",
            put(routes::deliveries::update_status),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
