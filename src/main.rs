use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_engine::{
    api::{create_router, AppState},
    config::Config,
    db::{self, CacheStore, MemoryStore, RedisStore},
    services::catalog::PgCatalog,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_engine=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to the catalog database")?;
    if config.run_migrations {
        db::postgres::run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    }
    let catalog = Arc::new(PgCatalog::new(pool, config.public_base_url.clone()));

    let store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::new(db::create_redis_client(url)?)),
        None => {
            tracing::warn!("REDIS_URL not set, feed cache is local to this process");
            Arc::new(MemoryStore::new())
        }
    };
    tracing::info!(store = store.name(), "Feed cache store selected");

    let state = AppState::from_parts(
        catalog.clone(),
        catalog,
        store,
        config.feed_settings(),
        &config.ingestion_settings(),
    );
    let app = create_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Feed engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.views.shutdown().await;
    tracing::info!("Feed engine stopped");
    Ok(())
}
