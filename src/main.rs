use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{backend::LocalFsBackend, upload_service::UploadService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting chunk-upload with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize core service ---
    let backend = Arc::new(LocalFsBackend::new(cfg.storage_dir.clone()));
    let service = UploadService::new(backend);

    match cfg.stale_upload_after {
        Some(max_age) => spawn_sweeper(service.clone(), max_age),
        None => tracing::debug!("Stale upload sweeping disabled"),
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_chunk_bytes).with_state(service);

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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically remove uploads nobody has touched for `max_age`.
fn spawn_sweeper(service: UploadService, max_age: Duration) {
    let period = (max_age / 4).clamp(Duration::from_secs(1), Duration::from_secs(3_600));
    tracing::info!(
        "Sweeping uploads idle for {}s every {}s",
        max_age.as_secs(),
        period.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match service.sweep_stale(max_age).await {
                Ok(report) if report.is_empty() => {}
                Ok(report) => tracing::info!(
                    namespaces = report.namespaces,
                    scratch_files = report.scratch_files,
                    failures = report.failures,
                    "Swept stale uploads"
                ),
                Err(err) => tracing::warn!(error = %err, "Stale upload sweep failed"),
            }
        }
    });
}
