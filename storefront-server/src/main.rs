//! Storefront HTTP server.

use anyhow::Context;
use storefront_postgres::PostgresCatalogStore;
use storefront_server::{router, shutdown_signal, telemetry, AppState, ServerConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_logging();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let store = PostgresCatalogStore::with_config(&config.database_url, config.postgres_config())
        .await
        .context("failed to connect to postgres")?;
    store.ping().await.context("postgres is not answering")?;
    if config.run_migrations {
        store.migrate().await.context("failed to apply migrations")?;
    }

    let app = router(AppState::from_config(store, &config));
    let address = config.socket_addr();
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "[server.listening] storefront server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("[server.stopped] shutdown complete");
    Ok(())
}
