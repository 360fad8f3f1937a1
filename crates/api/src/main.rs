//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use domain::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
use event_bus::{AmqpConnector, BusHandle};
use saga::{DeletionReconciler, HttpProductCatalog, HttpUserDirectory, OrderSaga, SagaBootstrap};
use sqlx::postgres::PgPoolOptions;
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
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_repository(config: &Config) -> Arc<dyn OrderRepository> {
    let Some(url) = &config.database_url else {
        tracing::info!("DATABASE_URL not set, keeping orders in memory");
        return Arc::new(InMemoryOrderRepository::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let repository = PostgresOrderRepository::new(pool);
    repository
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("using PostgreSQL order repository");
    Arc::new(repository)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the saga
    let orders = open_repository(&config).await;
    let users = HttpUserDirectory::new(&config.users_service_url, config.collaborator_timeout())
        .expect("failed to build users client");
    let products =
        HttpProductCatalog::new(&config.products_service_url, config.collaborator_timeout())
            .expect("failed to build products client");

    let bus = BusHandle::new();
    let saga = OrderSaga::new(orders.clone(), Arc::new(users), Arc::new(products), bus.clone());

    if config.seed_sample_data && orders.list().await.map(|o| o.is_empty()).unwrap_or(false) {
        saga.seed_sample_orders()
            .await
            .expect("failed to seed sample orders");
    }

    // 4. Keep the bus connected in the background
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bootstrap = SagaBootstrap::new(
        Arc::new(AmqpConnector::new(&config.rabbitmq_url, "orders-service")),
        bus,
        Arc::new(DeletionReconciler::new(orders)),
    )
    .with_retry_delay(config.bus_retry_delay());
    let bootstrap = tokio::spawn(bootstrap.run(shutdown_rx));

    // 5. Build the application
    let app = api::create_app(Arc::new(api::AppState::new(saga)), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    shutdown_tx.send_replace(true);
    let _ = bootstrap.await;
    tracing::info!("server shut down gracefully");
}
