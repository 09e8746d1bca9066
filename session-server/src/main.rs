mod archive;
mod auth;
mod config;
mod engine;
mod http;
mod journal;
mod store;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::http::{AppState, build_router};
use crate::journal::EventJournal;
use crate::store::redis::RedisStore;
use crate::ws::hub::Hub;
use crate::ws::service::SessionService;

#[tokio::main]
/// Activates tracing, connects the stores, spawns the hub actor and serves
/// the HTTP surface (which carries the socket upgrades) until shutdown.
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let cfg = Config::load();
    if cfg.jwt_secret.is_empty() {
        tracing::warn!("JWT_SECRET is empty; game endpoints will refuse to mint tokens");
    }

    let store = RedisStore::connect(&cfg.redis)
        .await
        .context("connecting to redis")?;
    tokio::time::timeout(Duration::from_secs(2), store.ping())
        .await
        .context("redis ping timed out")?
        .context("redis ping failed")?;
    tracing::info!(addr = %cfg.redis.addr, "connected to redis");

    let archive = match &cfg.postgres_dsn {
        Some(dsn) => {
            let archive = ArchiveStore::connect(dsn)
                .await
                .context("connecting to postgres")?;
            tracing::info!("connected to postgres archive");
            Some(Arc::new(archive))
        }
        None => {
            tracing::warn!("POSTGRES_DSN not set; finished games will not be archived");
            None
        }
    };

    let (hub, hub_task) = Hub::new();
    tokio::spawn(hub_task.run());

    let store = Arc::new(store);
    let journal = Arc::new(EventJournal::new());
    let service = SessionService::new(store.clone(), hub.clone(), journal, archive);
    let state = Arc::new(AppState {
        service,
        store,
        hub,
        jwt_secret: cfg.jwt_secret.clone(),
    });

    let app = build_router(state, &cfg.cors_origins);

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server_addr))?;
    tracing::info!(addr = %cfg.server_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
