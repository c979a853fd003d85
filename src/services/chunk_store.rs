//! Chunk Store
//!
//! Persists individual chunks beneath `chunks/{identity}/` and answers resume
//! queries by enumerating that namespace.

use crate::{
    errors::{UploadError, UploadResult},
    services::{
        backend::StorageBackend,
        identity::{CHUNKS_DIR, TargetFilename, UploadIdentity, parse_chunk_entry},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;
use uuid::Uuid;

/// Outcome of storing one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
    pub index: u32,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn StorageBackend>,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Directory holding every chunk of `identity`.
    pub fn namespace(identity: &UploadIdentity) -> PathBuf {
        Path::new(CHUNKS_DIR).join(identity.as_str())
    }

    pub fn chunk_path(identity: &UploadIdentity, filename: &TargetFilename, index: u32) -> PathBuf {
        Self::namespace(identity).join(filename.chunk_entry(index))
    }

    /// Stream a chunk payload into the namespace of `identity`.
    ///
    /// The payload lands in a hidden staging entry first and is then renamed
    /// onto its final chunk path, so a retried index replaces the previous
    /// chunk in one step and listings never see a partial chunk.
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
        let namespace = Self::namespace(identity);
        self.backend
            .create_dir_all(&namespace)
            .await
            .map_err(|source| write_error(&namespace, source))?;

        let staging = namespace.join(format!(".tmp-{}", Uuid::new_v4()));
        let size_bytes = match self.write_staging(&staging, payload).await {
            Ok(size) => size,
            Err(err) => {
                let _ = self.backend.delete_file(&staging).await;
                return Err(err);
            }
        };

        let chunk_path = Self::chunk_path(identity, filename, index);
        if let Err(source) = self.backend.rename(&staging, &chunk_path).await {
            let _ = self.backend.delete_file(&staging).await;
            return Err(write_error(&chunk_path, source));
        }

        debug!(
            identity = %identity,
            filename = %filename,
            index,
            size_bytes,
            "stored chunk"
        );
        Ok(ChunkReceipt { index, size_bytes })
    }

    async fn write_staging<S>(&self, staging: &Path, payload: S) -> UploadResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut handle = self
            .backend
            .open_write(staging)
            .await
            .map_err(|source| write_error(staging, source))?;

        let mut size_bytes = 0u64;
        pin_mut!(payload);
        while let Some(piece) = payload.next().await {
            let piece = piece.map_err(UploadError::Payload)?;
            size_bytes += piece.len() as u64;
            handle
                .append(&piece)
                .await
                .map_err(|source| write_error(staging, source))?;
        }
        handle
            .close()
            .await
            .map_err(|source| write_error(staging, source))?;
        Ok(size_bytes)
    }

    /// Indices currently stored for `identity`.
    ///
    /// An unknown identity simply has no chunks yet; any other listing
    /// failure is reported rather than mistaken for an empty upload.
    pub async fn list_chunks(&self, identity: &UploadIdentity) -> UploadResult<BTreeSet<u32>> {
        let namespace = Self::namespace(identity);
        let entries = match self.backend.list_entries(&namespace).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => return Err(read_error(&namespace, source)),
        };

        Ok(entries
            .iter()
            .filter_map(|entry| parse_chunk_entry(entry))
            .collect())
    }

    /// Delete every entry of `identity` and the namespace itself.
    pub async fn remove_namespace(&self, identity: &UploadIdentity) -> UploadResult<()> {
        let namespace = Self::namespace(identity);
        let entries = match self.backend.list_entries(&namespace).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(read_error(&namespace, source)),
        };

        for entry in &entries {
            let path = namespace.join(entry);
            self.backend
                .delete_file(&path)
                .await
                .map_err(|source| write_error(&path, source))?;
        }
        self.backend
            .delete_dir(&namespace)
            .await
            .map_err(|source| write_error(&namespace, source))?;

        debug!(identity = %identity, removed = entries.len(), "removed chunk namespace");
        Ok(())
    }
}

fn write_error(path: &Path, source: io::Error) -> UploadError {
    UploadError::StorageWrite {
        path: path.display().to_string(),
        source,
    }
}

fn read_error(path: &Path, source: io::Error) -> UploadError {
    UploadError::StorageRead {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::backend::memory::MemoryBackend;
    use futures::stream;

    pub(crate) fn payload(bytes: &[u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        stream::iter(vec![Ok(Bytes::copy_from_slice(bytes))])
    }

    fn store() -> (MemoryBackend, ChunkStore) {
        let backend = MemoryBackend::new();
        (backend.clone(), ChunkStore::new(Arc::new(backend)))
    }

    fn ids(fingerprint: &str, filename: &str) -> (UploadIdentity, TargetFilename) {
        (
            UploadIdentity::resolve(fingerprint).unwrap(),
            TargetFilename::parse(filename).unwrap(),
        )
    }

    #[tokio::test]
    async fn unknown_identity_lists_empty() {
        let (backend, store) = store();
        let (id, _) = ids("never-seen", "a.bin");
        assert!(store.list_chunks(&id).await.unwrap().is_empty());
        assert!(!backend.exists(&ChunkStore::namespace(&id)).await.unwrap());
    }

    #[tokio::test]
    async fn listing_reflects_distinct_indices_in_any_order() {
        let (_, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        for index in [4, 0, 2, 4, 0, 7] {
            store.put_chunk(&id, &name, index, payload(b"data")).await.unwrap();
        }
        let listed: Vec<u32> = store.list_chunks(&id).await.unwrap().into_iter().collect();
        assert_eq!(listed, vec![0, 2, 4, 7]);
    }

    #[tokio::test]
    async fn reupload_overwrites_previous_chunk() {
        let (backend, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        store.put_chunk(&id, &name, 1, payload(b"first")).await.unwrap();
        let receipt = store.put_chunk(&id, &name, 1, payload(b"again!")).await.unwrap();

        assert_eq!(receipt, ChunkReceipt { index: 1, size_bytes: 6 });
        let path = ChunkStore::chunk_path(&id, &name, 1);
        assert_eq!(backend.contents(&path).unwrap(), b"again!");
        // no staging leftovers
        assert_eq!(backend.file_paths(), vec![path]);
    }

    #[tokio::test]
    async fn multi_dot_filenames_parse_by_suffix() {
        let (_, store) = store();
        let (id, name) = ids("f00d", "report.v2.tar.gz");
        for index in [10, 3, 0] {
            store.put_chunk(&id, &name, index, payload(b"x")).await.unwrap();
        }
        let listed: Vec<u32> = store.list_chunks(&id).await.unwrap().into_iter().collect();
        assert_eq!(listed, vec![0, 3, 10]);
    }

    #[tokio::test]
    async fn listing_failure_is_not_an_empty_result() {
        let (backend, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        store.put_chunk(&id, &name, 0, payload(b"x")).await.unwrap();
        backend.fail_path(ChunkStore::namespace(&id));

        let err = store.list_chunks(&id).await.unwrap_err();
        assert!(matches!(err, UploadError::StorageRead { .. }));
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_storage_write() {
        let (backend, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        backend.fail_path(ChunkStore::namespace(&id));

        let err = store.put_chunk(&id, &name, 0, payload(b"x")).await.unwrap_err();
        assert!(matches!(err, UploadError::StorageWrite { .. }));
    }

    #[tokio::test]
    async fn broken_payload_leaves_no_chunk() {
        let (backend, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = store.put_chunk(&id, &name, 0, broken).await.unwrap_err();
        assert!(matches!(err, UploadError::Payload(_)));
        assert!(store.list_chunks(&id).await.unwrap().is_empty());
        assert!(backend.file_paths().is_empty());
    }

    #[tokio::test]
    async fn remove_namespace_is_idempotent() {
        let (backend, store) = store();
        let (id, name) = ids("abc123", "video.mp4");
        store.put_chunk(&id, &name, 0, payload(b"x")).await.unwrap();
        store.put_chunk(&id, &name, 1, payload(b"y")).await.unwrap();

        store.remove_namespace(&id).await.unwrap();
        assert!(!backend.exists(&ChunkStore::namespace(&id)).await.unwrap());
        store.remove_namespace(&id).await.unwrap();

        let (ghost, _) = ids("ghost", "a.bin");
        store.remove_namespace(&ghost).await.unwrap();
    }
}
