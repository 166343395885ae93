//! Server wiring: storage, collaborators and the HTTP listener.

use std::sync::Arc;

use anyhow::Context;
use chunkvault_store::{FsSessionStore, MemoryCatalog, MemoryQuota, StorageLayout, UploadService};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::routes;

/// Builds the upload service over `layout`.
///
/// Sessions persist on disk. File records and quota usage live in memory.
pub fn build_service(layout: StorageLayout, quota_bytes_per_owner: u64) -> Arc<UploadService> {
    Arc::new(UploadService::new(
        layout.clone(),
        Arc::new(FsSessionStore::new(layout)),
        Arc::new(MemoryCatalog::new()),
        Arc::new(MemoryQuota::new(quota_bytes_per_owner)),
    ))
}

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let layout = StorageLayout::new(&config.storage_root);
    layout
        .ensure_dirs()
        .await
        .with_context(|| format!("preparing {}", config.storage_root.display()))?;

    let service = build_service(layout, config.quota_bytes_per_owner);
    let app = routes::router(service, config.max_chunk_bytes);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    tracing::info!("upload store listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
