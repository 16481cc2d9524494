//! Snack roster binary entrypoint wiring configuration, the claim store, REST and SSE.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snack_roster::{
    config::{AppConfig, StoreKind},
    dao::{
        backend::MemoryBackend,
        claim_store::{ClaimStore, LocalClaimStore, SyncedClaimStore},
    },
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = build_store(config.store()).await?;
    let app_state = AppState::new(store, config);

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Instantiate the configured store, connecting to its backend when it has one.
async fn build_store(kind: StoreKind) -> anyhow::Result<Arc<dyn ClaimStore>> {
    info!(store = %kind, "initialising claim store");
    match kind {
        StoreKind::Local => Ok(Arc::new(LocalClaimStore::new())),
        StoreKind::Memory => {
            let store = SyncedClaimStore::start(MemoryBackend::new())
                .await
                .context("starting memory-backed store")?;
            Ok(Arc::new(store))
        }
        StoreKind::Mongo => mongo_store().await,
        StoreKind::Couch => couch_store().await,
    }
}

#[cfg(feature = "mongo-store")]
async fn mongo_store() -> anyhow::Result<Arc<dyn ClaimStore>> {
    use snack_roster::dao::backend::mongodb::{MongoBackend, MongoConfig};

    let config = MongoConfig::from_env()
        .await
        .context("reading MongoDB configuration")?;
    let backend = MongoBackend::connect(config)
        .await
        .context("connecting to MongoDB")?;
    let store = SyncedClaimStore::start(backend)
        .await
        .context("opening MongoDB change stream")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongo-store"))]
async fn mongo_store() -> anyhow::Result<Arc<dyn ClaimStore>> {
    anyhow::bail!("store `mongo` requires the `mongo-store` feature")
}

#[cfg(feature = "couch-store")]
async fn couch_store() -> anyhow::Result<Arc<dyn ClaimStore>> {
    use snack_roster::dao::backend::couchdb::{CouchBackend, CouchConfig};

    let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
    let backend = CouchBackend::connect(config)
        .await
        .context("connecting to CouchDB")?;
    let store = SyncedClaimStore::start(backend)
        .await
        .context("opening CouchDB changes feed")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "couch-store"))]
async fn couch_store() -> anyhow::Result<Arc<dyn ClaimStore>> {
    anyhow::bail!("store `couch` requires the `couch-store` feature")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
