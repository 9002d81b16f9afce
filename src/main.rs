use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    file_service::FileService,
    listing_cache::ListingCache,
    storage_service::{LocalObjectStore, ObjectStore, run_migrations},
    thumbnail::{
        generator::{ThumbnailConfig, ThumbnailGenerator},
        job::ThumbnailJob,
    },
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting thumbnail-service with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);

    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .context("connecting to metadata database")?,
    );

    // --- Schema (idempotent); migration mode exits here ---
    let applied = run_migrations(&db).await.context("running migrations")?;
    if migrate {
        tracing::info!("Database migration complete ({} statements).", applied);
        return Ok(());
    }

    // --- Object store + configured bucket ---
    let local = LocalObjectStore::new(db.clone(), cfg.storage_dir.clone());
    local
        .ensure_bucket(&cfg.bucket)
        .await
        .with_context(|| format!("preparing bucket `{}`", cfg.bucket))?;
    let store: Arc<dyn ObjectStore> = Arc::new(local);

    // --- Core services ---
    let cache = ListingCache::new(store.clone(), cfg.public_base_url.clone());
    let generator = ThumbnailGenerator::new(
        store.clone(),
        ThumbnailConfig {
            width: cfg.thumbnail_width,
            folder: cfg.thumbnail_folder.clone(),
            public_base_url: cfg.public_base_url.clone(),
        },
    );
    let job = Arc::new(ThumbnailJob::new(
        store.clone(),
        generator,
        cache.clone(),
        cfg.bucket.clone(),
    ));
    let files = FileService::new(
        store,
        cache,
        cfg.bucket.clone(),
        cfg.thumbnail_folder.clone(),
        cfg.public_base_url.clone(),
    );

    // --- Background thumbnail job ---
    let shutdown = CancellationToken::new();
    let job_handle = tokio::spawn(job.clone().run_forever(cfg.job_interval, shutdown.clone()));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState { files, job });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The job finishes its current run before the loop observes the token.
    shutdown.cancel();
    job_handle.await?;

    Ok(())
}

/// Resolve on Ctrl-C and cancel `token` so background work winds down too.
async fn shutdown_signal(token: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        token.cancelled().await;
        return;
    }
    tracing::info!("Shutdown signal received");
    token.cancel();
}
