//! Merge Engine
//!
//! Concatenates a complete chunk set, in ascending index order, into the
//! final artifact. Output is staged next to the artifact and renamed into
//! place only after every chunk has been appended, so a failed merge never
//! leaves a partial artifact and never consumes chunks.

use crate::{
    errors::{UploadError, UploadResult},
    models::upload::Artifact,
    services::{
        backend::{StorageBackend, WriteHandle},
        chunk_store::ChunkStore,
        identity::{MERGE_STAGING_PREFIX, TargetFilename, UploadIdentity},
    },
};
use chrono::Utc;
use md5::Context;
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct MergeEngine {
    backend: Arc<dyn StorageBackend>,
    chunks: ChunkStore,
}

impl MergeEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, chunks: ChunkStore) -> Self {
        Self { backend, chunks }
    }

    /// Path of the merged artifact for `filename` in the output namespace.
    pub fn artifact_path(filename: &TargetFilename) -> PathBuf {
        PathBuf::from(filename.as_str())
    }

    /// Merge chunks `0..total_chunks` of `identity` into `filename`.
    ///
    /// Callers must not run two merges for the same identity at once; see
    /// `UploadLocks`.
    pub async fn merge(
        &self,
        identity: &UploadIdentity,
        filename: &TargetFilename,
        total_chunks: u32,
    ) -> UploadResult<Artifact> {
        let namespace = ChunkStore::namespace(identity);
        let entries = match self.backend.list_entries(&namespace).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NoSuchUpload(identity.to_string()));
            }
            Err(source) => {
                return Err(UploadError::StorageRead {
                    path: namespace.display().to_string(),
                    source,
                });
            }
        };
        if total_chunks == 0 {
            return Err(UploadError::InvalidChunkCount(total_chunks));
        }

        let present: HashSet<String> = entries.into_iter().collect();
        if let Some(missing_index) =
            (0..total_chunks).find(|index| !present.contains(&filename.chunk_entry(*index)))
        {
            return Err(UploadError::IncompleteUpload {
                identity: identity.to_string(),
                missing_index,
            });
        }

        let artifact_path = Self::artifact_path(filename);
        let staging = PathBuf::from(format!("{}{}", MERGE_STAGING_PREFIX, Uuid::new_v4()));
        let (size_bytes, etag) = match self
            .write_staging(&staging, identity, filename, total_chunks)
            .await
        {
            Ok(written) => written,
            Err(err) => {
                let _ = self.backend.delete_file(&staging).await;
                return Err(err);
            }
        };

        if let Err(source) = self.backend.rename(&staging, &artifact_path).await {
            let _ = self.backend.delete_file(&staging).await;
            return Err(merge_error(&artifact_path, source));
        }

        if let Err(err) = self.chunks.remove_namespace(identity).await {
            warn!(
                identity = %identity,
                error = %err,
                "artifact written but chunk namespace could not be removed"
            );
            return Err(err);
        }

        info!(
            identity = %identity,
            filename = %filename,
            total_chunks,
            size_bytes,
            "merged upload"
        );

        Ok(Artifact {
            filename: filename.to_string(),
            path: artifact_path.display().to_string(),
            size_bytes,
            chunk_count: total_chunks,
            etag,
            merged_at: Utc::now(),
        })
    }

    /// Append every chunk to `staging` in ascending index order.
    async fn write_staging(
        &self,
        staging: &Path,
        identity: &UploadIdentity,
        filename: &TargetFilename,
        total_chunks: u32,
    ) -> UploadResult<(u64, String)> {
        let mut output: Box<dyn WriteHandle> = self
            .backend
            .open_write(staging)
            .await
            .map_err(|source| merge_error(staging, source))?;

        let mut size_bytes = 0u64;
        let mut digest = Context::new();
        for index in 0..total_chunks {
            let chunk_path = ChunkStore::chunk_path(identity, filename, index);
            let bytes = self
                .backend
                .read_file(&chunk_path)
                .await
                .map_err(|source| merge_error(&chunk_path, source))?;
            output
                .append(&bytes)
                .await
                .map_err(|source| merge_error(staging, source))?;
            digest.consume(&bytes);
            size_bytes += bytes.len() as u64;
        }

        output
            .close()
            .await
            .map_err(|source| merge_error(staging, source))?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }
}

fn merge_error(path: &Path, source: std::io::Error) -> UploadError {
    UploadError::MergeIo {
        path: path.display().to_string(),
        source,
    }
}
