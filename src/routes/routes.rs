//! Defines routes for the resumable upload protocol.
//!
//! ## Structure
//! - **Upload endpoints** (JSON bodies unless noted)
//!   - `POST /api/checkFile`         does the merged file already exist
//!   - `POST /api/getUploadedChunks` chunk indices stored so far (resume)
//!   - `POST /api/uploadChunk`       multipart chunk ingestion
//!   - `POST /api/mergeChunks`       assemble all chunks into the final file
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{check_file, get_uploaded_chunks, merge_chunks, upload_chunk},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all upload routes.
///
/// `max_chunk_bytes` bounds the request body of a single chunk upload.
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes(max_chunk_bytes: usize) -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/checkFile", post(check_file))
        .route("/api/getUploadedChunks", post(get_uploaded_chunks))
        .route(
            "/api/uploadChunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
        .route("/api/mergeChunks", post(merge_chunks))
}
