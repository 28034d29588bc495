use anyhow::{Context, Result};
use download_gate::{
    config::{AppConfig, ObjectBackendConfig},
    services::{
        download_gate::DownloadGate,
        grant_store::GrantStore,
        object_store::{HttpObjectStore, LocalObjectStore, ObjectStore},
    },
};
use std::{io::ErrorKind, path::Path};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

const MAX_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting download-gate with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let grants = GrantStore::connect(db_url, MAX_DB_CONNECTIONS)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;
    grants.migrate().await.context("running migrations")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let objects = match &cfg.objects {
        ObjectBackendConfig::Local { dir } => {
            if !dir.is_dir() {
                anyhow::bail!("object directory {} does not exist", dir.display());
            }
            ObjectStore::Local(LocalObjectStore::new(dir))
        }
        ObjectBackendConfig::Http {
            endpoint,
            bucket,
            token,
        } => {
            let client = reqwest::Client::builder()
                .build()
                .context("building object store HTTP client")?;
            ObjectStore::Http(HttpObjectStore::new(
                client,
                endpoint,
                bucket.clone(),
                token.clone(),
            )?)
        }
    };
    tracing::info!("Serving objects from {}", objects.describe());

    let gate = DownloadGate::new(grants, objects);

    // --- Build router ---
    let app = download_gate::app(gate, cfg.edge_headers());

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

    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
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
