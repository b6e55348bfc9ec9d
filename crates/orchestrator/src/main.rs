//! Orchestrator entry point.

use std::sync::Arc;

use messaging::{Connector, Transport};
use orchestrator::AppState;
use orchestrator::config::{Config, LogFormat};
use saga::{InMemoryStores, LogNotifier, ReconciliationWorker};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[cfg(feature = "amqp")]
fn connector(config: &Config) -> Arc<dyn Connector> {
    Arc::new(messaging::amqp::AmqpConnector::new(config.amqp_url.clone()))
}

#[cfg(not(feature = "amqp"))]
fn connector(_config: &Config) -> Arc<dyn Connector> {
    tracing::warn!("built without the amqp feature, using the in-process broker");
    Arc::new(messaging::InMemoryBroker::new())
}

fn describe_metrics() {
    metrics::describe_counter!("orders_created_total", "Orders placed successfully");
    metrics::describe_counter!("orders_failed_total", "Order sagas that failed, by reason");
    metrics::describe_histogram!(
        "saga_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of the create-order saga"
    );
    metrics::describe_counter!("saga_compensations_total", "Compensation steps executed");
    metrics::describe_counter!(
        "reconciler_dispatched_total",
        "Waiting deliveries dispatched by the worker"
    );
    metrics::describe_counter!("messages_published_total", "Broker publishes confirmed");
    metrics::describe_counter!("messages_publish_failed_total", "Broker publishes not confirmed");
    metrics::describe_counter!("messages_consumed_total", "Inbound messages handled");
    metrics::describe_counter!("broker_reconnects_total", "Successful broker reconnects");
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Connect to the broker
    let transport = Arc::new(
        Transport::connect(connector(&config), config.transport_config())
            .await
            .expect("failed to connect to message broker"),
    );

    // 4. Repositories and application state
    let stores = InMemoryStores::new();
    let repos = stores.repositories();
    let state = Arc::new(AppState::new(
        repos.clone(),
        transport.clone(),
        Arc::new(LogNotifier),
    ));

    // 5. Background consumers
    state
        .lifecycle
        .start_confirmation_consumer(&transport, config.confirmation_timeout)
        .await
        .expect("failed to start confirmation consumer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(repos, transport.clone(), config.reconciler_config());
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    // 6. Serve HTTP
    let app = orchestrator::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting orchestrator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop the worker and the broker connection
    let _ = shutdown_tx.send(true);
    if let Err(err) = worker_handle.await {
        tracing::error!(error = %err, "reconciliation worker panicked");
    }
    if let Err(err) = transport.close().await {
        tracing::warn!(error = %err, "error closing broker connection");
    }

    tracing::info!("orchestrator shut down gracefully");
}
