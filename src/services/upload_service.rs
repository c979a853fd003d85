//! src/services/upload_service.rs
//!
//! UploadService: the state shared by every HTTP handler. It wires the chunk
//! store and merge engine to one storage backend, serializes merges per
//! upload identity, and optionally sweeps abandoned uploads.

use crate::{
    errors::{UploadError, UploadResult},
    models::upload::Artifact,
    services::{
        backend::StorageBackend,
        chunk_store::{ChunkReceipt, ChunkStore},
        identity::{CHUNKS_DIR, TargetFilename, UploadIdentity, is_scratch_entry},
        merge_engine::MergeEngine,
        upload_locks::UploadLocks,
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct UploadService {
    /// Backend shared with the chunk store and merge engine.
    pub backend: Arc<dyn StorageBackend>,
    chunks: ChunkStore,
    merger: MergeEngine,
    pub(crate) locks: UploadLocks,
}

impl UploadService {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let chunks = ChunkStore::new(backend.clone());
        let merger = MergeEngine::new(backend.clone(), chunks.clone());
        Self {
            backend,
            chunks,
            merger,
            locks: UploadLocks::new(),
        }
    }

    /// Whether a merged artifact named `filename` already exists.
    pub async fn artifact_exists(&self, filename: &TargetFilename) -> UploadResult<bool> {
        let path = MergeEngine::artifact_path(filename);
        self.backend
            .exists(&path)
            .await
            .map_err(|source| UploadError::StorageRead {
                path: path.display().to_string(),
                source,
            })
    }

    /// Resume query: stored chunk indices in ascending order.
    pub async fn uploaded_chunks(&self, identity: &UploadIdentity) -> UploadResult<Vec<u32>> {
        Ok(self.chunks.list_chunks(identity).await?.into_iter().collect())
    }

    pub async fn put_chunk<S>(
        &self,
        identity: &UploadIdentity,
        filename: &TargetFilename,
        index: u32,
        payload: S,
    ) -> UploadResult<ChunkReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.chunks.put_chunk(identity, filename, index, payload).await
    }

    /// Merge an upload, refusing to start while another merge of the same
    /// identity is running.
    pub async fn merge(
        &self,
        identity: &UploadIdentity,
        filename: &TargetFilename,
        total_chunks: u32,
    ) -> UploadResult<Artifact> {
        let _guard = self
            .locks
            .try_acquire(identity)
            .ok_or_else(|| UploadError::MergeInProgress(identity.to_string()))?;
        self.merger.merge(identity, filename, total_chunks).await
    }

    /// Remove chunk namespaces untouched for at least `max_age`, along with
    /// merge and readiness scratch files of the same age in the output
    /// namespace.
    ///
    /// Identities being merged are skipped. A namespace or file that cannot
    /// be removed is counted in [`SweepReport::failures`] and the sweep moves
    /// on; only an unreadable storage root fails the whole call.
    pub async fn sweep_stale(&self, max_age: Duration) -> UploadResult<SweepReport> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();
        self.sweep_namespaces(now, max_age, &mut report).await?;
        self.sweep_scratch(now, max_age, &mut report).await?;
        if report.failures > 0 {
            warn!(failures = report.failures, "stale sweep left entries behind");
        }
        Ok(report)
    }

    async fn sweep_namespaces(
        &self,
        now: SystemTime,
        max_age: Duration,
        report: &mut SweepReport,
    ) -> UploadResult<()> {
        let root = Path::new(CHUNKS_DIR);
        let Some(names) = self.list_root(root).await? else {
            return Ok(());
        };

        for name in names {
            let Ok(identity) = UploadIdentity::resolve(&name) else {
                debug!(entry = %name, "skipping foreign entry in chunk root");
                continue;
            };
            let Some(_guard) = self.locks.try_acquire(&identity) else {
                continue;
            };

            let namespace = ChunkStore::namespace(&identity);
            let modified = match self.backend.modified(&namespace).await {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(identity = %identity, error = %err, "cannot stat chunk namespace");
                    report.failures += 1;
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            if let Err(err) = self.chunks.remove_namespace(&identity).await {
                warn!(identity = %identity, error = %err, "cannot remove stale chunk namespace");
                report.failures += 1;
                continue;
            }
            info!(identity = %identity, age_secs = age.as_secs(), "swept stale upload");
            report.namespaces += 1;
        }
        Ok(())
    }

    async fn sweep_scratch(
        &self,
        now: SystemTime,
        max_age: Duration,
        report: &mut SweepReport,
    ) -> UploadResult<()> {
        let Some(names) = self.list_root(Path::new("")).await? else {
            return Ok(());
        };

        for name in names.into_iter().filter(|name| is_scratch_entry(name)) {
            let path = PathBuf::from(&name);
            let modified = match self.backend.modified(&path).await {
                Ok(modified) => modified,
                // renamed or cleaned up since the listing
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(entry = %name, error = %err, "cannot stat scratch file");
                    report.failures += 1;
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or(Duration::ZERO) < max_age {
                continue;
            }

            match self.backend.delete_file(&path).await {
                Ok(()) => {
                    debug!(entry = %name, "removed stale scratch file");
                    report.scratch_files += 1;
                }
                Err(err) => {
                    warn!(entry = %name, error = %err, "cannot remove scratch file");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Entries of `dir`, or `None` when it does not exist yet.
    async fn list_root(&self, dir: &Path) -> UploadResult<Option<Vec<String>>> {
        match self.backend.list_entries(dir).await {
            Ok(names) => Ok(Some(names)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(UploadError::StorageRead {
                path: dir.display().to_string(),
                source,
            }),
        }
    }
}

/// Outcome of one [`UploadService::sweep_stale`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub namespaces: usize,
    pub scratch_files: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
