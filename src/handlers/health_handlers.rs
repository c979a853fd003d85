//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips a probe file through storage

use crate::services::{identity::READY_PROBE_PREFIX, upload_service::UploadService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::PathBuf};
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Performs a best-effort write/read/delete of a temp file through the
/// storage backend. HTTP 200 when the round trip works, 503 otherwise.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let tmp_path = PathBuf::from(format!("{}{}", READY_PROBE_PREFIX, Uuid::new_v4()));
    let backend = &service.backend;

    let written = match backend.open_write(&tmp_path).await {
        Ok(mut handle) => match handle.append(PROBE).await {
            Ok(()) => handle.close().await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };
    let disk_check = match written {
        Ok(()) => match backend.read_file(&tmp_path).await {
            Ok(bytes) if &bytes[..] == PROBE => match backend.delete_file(&tmp_path).await {
                Ok(()) => (true, None::<String>),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => (false, Some("file content mismatch".to_string())),
            Err(e) => (false, Some(format!("could not read tmp file: {}", e))),
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };
    if !disk_check.0 {
        let _ = backend.delete_file(&tmp_path).await; // best-effort cleanup
        tracing::warn!("readiness probe failed: {:?}", disk_check.1);
    }

    let overall_ok = disk_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
