//! HTTP handlers for the resumable upload protocol.
//! Chunk payloads are streamed straight into the chunk store when the
//! metadata fields arrive first; everything else is delegated to
//! `UploadService`.

use crate::{
    errors::AppError,
    models::upload::Artifact,
    services::{
        identity::{TargetFilename, UploadIdentity, parse_chunk_index},
        upload_service::UploadService,
    },
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::io;

/// Body of `POST /api/checkFile`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFileReq {
    pub file_name: String,
}

/// Body of `POST /api/getUploadedChunks`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunksReq {
    pub file_hash: String,
}

/// Body of `POST /api/mergeChunks`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksReq {
    pub file_hash: String,
    pub file_name: String,
    pub total_chunks: u32,
}

#[derive(Debug, Serialize)]
pub struct CheckFileResp {
    pub exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResp {
    pub success: bool,
    pub chunk_index: u32,
    pub file_hash: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksResp {
    pub success: bool,
    pub file_path: String,
    pub size: u64,
    pub chunk_count: u32,
    pub etag: String,
    pub merged_at: chrono::DateTime<chrono::Utc>,
}

impl From<Artifact> for MergeChunksResp {
    fn from(artifact: Artifact) -> Self {
        Self {
            success: true,
            file_path: artifact.path,
            size: artifact.size_bytes,
            chunk_count: artifact.chunk_count,
            etag: artifact.etag,
            merged_at: artifact.merged_at,
        }
    }
}

/// `POST /api/checkFile`: does a merged file with this name already exist?
pub async fn check_file(
    State(service): State<UploadService>,
    Json(req): Json<CheckFileReq>,
) -> Result<Json<CheckFileResp>, AppError> {
    let filename = TargetFilename::parse(&req.file_name)?;
    let exists = service.artifact_exists(&filename).await?;
    Ok(Json(CheckFileResp { exists }))
}

/// `POST /api/getUploadedChunks`: indices already stored for a fingerprint.
pub async fn get_uploaded_chunks(
    State(service): State<UploadService>,
    Json(req): Json<UploadedChunksReq>,
) -> Result<Json<Vec<u32>>, AppError> {
    let identity = UploadIdentity::resolve(&req.file_hash)?;
    let indices = service.uploaded_chunks(&identity).await?;
    Ok(Json(indices))
}

/// Metadata fields of an upload form, collected as they arrive.
#[derive(Default)]
struct ChunkForm {
    chunk_index: Option<String>,
    file_hash: Option<String>,
    file_name: Option<String>,
}

impl ChunkForm {
    fn complete(&self) -> bool {
        self.chunk_index.is_some() && self.file_hash.is_some() && self.file_name.is_some()
    }

    fn resolve(&self) -> Result<(UploadIdentity, TargetFilename, u32), AppError> {
        let (Some(raw_index), Some(hash), Some(name)) =
            (&self.chunk_index, &self.file_hash, &self.file_name)
        else {
            return Err(AppError::bad_request("Missing required fields or file."));
        };
        let identity = UploadIdentity::resolve(hash)?;
        let filename = TargetFilename::parse(name)?;
        let index = parse_chunk_index(raw_index)?;
        Ok((identity, filename, index))
    }
}

/// Each form field may appear once; a repeat would make the stored chunk and
/// the reported metadata disagree.
fn set_once<T>(slot: &mut Option<T>, field: &str, value: T) -> Result<(), AppError> {
    if slot.is_some() {
        return Err(AppError::bad_request(format!("duplicate form field `{}`", field)));
    }
    *slot = Some(value);
    Ok(())
}

fn field_stream(field: Field<'_>) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + '_ {
    field.map(|piece| piece.map_err(io::Error::other))
}

/// `POST /api/uploadChunk`: multipart form with `chunkIndex`, `fileHash`,
/// `fileName` and the `file` payload.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = ChunkForm::default();
    let mut stored = None;
    let mut buffered: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        AppError::bad_request(format!("invalid multipart body: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "chunkIndex" => set_once(&mut form.chunk_index, &name, read_text(field).await?)?,
            "fileHash" => set_once(&mut form.file_hash, &name, read_text(field).await?)?,
            "fileName" => set_once(&mut form.file_name, &name, read_text(field).await?)?,
            "file" if stored.is_some() || buffered.is_some() => {
                return Err(AppError::bad_request("duplicate form field `file`"));
            }
            "file" if form.complete() => {
                let (identity, filename, index) = form.resolve()?;
                let receipt = service
                    .put_chunk(&identity, &filename, index, field_stream(field))
                    .await?;
                stored = Some((identity, filename, receipt));
            }
            "file" => {
                // Metadata has not arrived yet; hold the payload until it does.
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("failed to read chunk payload: {}", e))
                })?;
                buffered = Some(bytes);
            }
            other => tracing::debug!("ignoring multipart field `{}`", other),
        }
    }

    let (identity, filename, receipt) = match (stored, buffered) {
        (Some(stored), _) => stored,
        (None, Some(bytes)) => {
            let (identity, filename, index) = form.resolve()?;
            let receipt = service
                .put_chunk(&identity, &filename, index, stream::iter([Ok(bytes)]))
                .await?;
            (identity, filename, receipt)
        }
        (None, None) => return Err(AppError::bad_request("Missing required fields or file.")),
    };

    Ok(Json(UploadChunkResp {
        success: true,
        chunk_index: receipt.index,
        file_hash: identity.to_string(),
        file_name: filename.to_string(),
        size: receipt.size_bytes,
    }))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("unreadable form field: {}", e)))
}

/// `POST /api/mergeChunks`: assemble all chunks into the final file.
pub async fn merge_chunks(
    State(service): State<UploadService>,
    Json(req): Json<MergeChunksReq>,
) -> Result<Json<MergeChunksResp>, AppError> {
    let identity = UploadIdentity::resolve(&req.file_hash)?;
    let filename = TargetFilename::parse(&req.file_name)?;
    let artifact = service.merge(&identity, &filename, req.total_chunks).await?;
    Ok(Json(artifact.into()))
}
