//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::routes::AppState;
use lending::{LendingEngine, SystemClock};
use library_store::{InMemoryLibraryStore, LibraryStore, PostgresLibraryStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
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
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Builds the engine over `store` and serves until shutdown.
async fn serve<S: LibraryStore + 'static>(
    config: &Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    let engine = LendingEngine::new(store, config.lending_config(), SystemClock);
    let app = api::create_app(Arc::new(AppState::new(engine)), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::describe_metrics();

    // 3. Open the store and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresLibraryStore::connect(
                url,
                config.database_max_connections,
                config.lock_timeout(),
            )
            .await
            .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            serve(&config, store, metrics_handle).await;
        }
        None => {
            let store = InMemoryLibraryStore::new();
            api::seed_demo_catalog(&store)
                .await
                .expect("demo catalog ids are valid");
            tracing::warn!("DATABASE_URL not set, using in-memory store with demo catalog");
            serve(&config, store, metrics_handle).await;
        }
    }
}
