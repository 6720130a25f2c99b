mod config;
mod error;
mod ingest;
mod routes;
mod storage;
mod thumbnail;

use std::sync::Arc;

use anyhow::Context;
use booru_db::Store;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::ingest::Ingestor;
use crate::routes::AppState;
use crate::storage::MediaStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booru_server=debug,booru_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init DB and storage
    let store = Arc::new(
        Store::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path.display()))?,
    );
    let media = Arc::new(MediaStore::new(config.media_dir.clone()).await?);
    let thumbnailer = thumbnail::from_backend(config.thumbnailer, &config.convert_bin);
    let ingestor = Ingestor::new(store.clone(), media.clone(), thumbnailer);

    let state = AppState {
        store,
        media,
        ingestor,
        base_url: config.base_url.clone(),
    };

    // CORS: permissive, the board is read by local tools and browser front-ends alike
    let app = routes::router(state, config.max_upload_bytes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = config.addr()?;
    info!("localbooru listening on {}", addr);
    info!(
        "Database {}, media under {}, {:?} thumbnails",
        config.db_path.display(),
        config.media_dir.display(),
        config.thumbnailer
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("No SIGTERM handler ({}), waiting for Ctrl+C", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
