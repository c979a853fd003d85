//! Storage capability consumed by the chunk store and merge engine.
//!
//! Paths handed to a backend are relative to its root; the backend decides
//! where that root lives. `LocalFsBackend` keeps everything under one
//! directory on disk.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;

#[cfg(test)]
pub mod memory;

/// Open output stream returned by [`StorageBackend::open_write`].
#[async_trait]
pub trait WriteHandle: Send {
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush and make the written bytes durable.
    async fn close(self: Box<Self>) -> io::Result<()>;
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Names of the direct children of `dir`. Fails with `NotFound` when the
    /// directory is absent.
    async fn list_entries(&self, dir: &Path) -> io::Result<Vec<String>>;

    async fn read_file(&self, path: &Path) -> io::Result<Bytes>;

    /// Create (or truncate) `path` for writing. The parent must exist.
    async fn open_write(&self, path: &Path) -> io::Result<Box<dyn WriteHandle>>;

    /// No-op when `path` is already gone.
    async fn delete_file(&self, path: &Path) -> io::Result<()>;

    /// Remove `path` and anything left inside it. No-op when already gone.
    async fn delete_dir(&self, path: &Path) -> io::Result<()>;

    /// Move `src` onto `dst`, replacing `dst` if it exists.
    async fn rename(&self, src: &Path, dst: &Path) -> io::Result<()>;

    async fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Backend storing everything beneath `base_path` on the local disk.
#[derive(Clone, Debug)]
pub struct LocalFsBackend {
    base_path: PathBuf,
}

impl LocalFsBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_path.join(path)
    }
}

struct LocalWriteHandle {
    file: File,
}

#[async_trait]
impl WriteHandle for LocalWriteHandle {
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let mut file = self.file;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(self.resolve(path)).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)).await
    }

    async fn list_entries(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(self.resolve(dir)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!("skipping non UTF-8 entry {:?}", raw),
            }
        }
        Ok(names)
    }

    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        fs::read(self.resolve(path)).await.map(Bytes::from)
    }

    async fn open_write(&self, path: &Path) -> io::Result<Box<dyn WriteHandle>> {
        let file = File::create(self.resolve(path)).await?;
        Ok(Box::new(LocalWriteHandle { file }))
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(self.resolve(path)).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn delete_dir(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(self.resolve(path)).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let (src, dst) = (self.resolve(src), self.resolve(dst));
        match fs::rename(&src, &dst).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(&dst).await?;
                fs::rename(&src, &dst).await
            }
            other => other,
        }
    }

    async fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(self.resolve(path)).await?.modified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(backend: &LocalFsBackend, path: &str, bytes: &[u8]) {
        let mut handle = backend.open_write(Path::new(path)).await.unwrap();
        handle.append(bytes).await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn listing_missing_dir_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let err = backend.list_entries(Path::new("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn write_list_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        backend.create_dir_all(Path::new("chunks/abc")).await.unwrap();
        write(&backend, "chunks/abc/a.part.0", b"hello ").await;
        write(&backend, "chunks/abc/a.part.1", b"world").await;

        let mut names = backend.list_entries(Path::new("chunks/abc")).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.part.0", "a.part.1"]);
        let bytes = backend.read_file(Path::new("chunks/abc/a.part.1")).await.unwrap();
        assert_eq!(&bytes[..], b"world");
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        backend.create_dir_all(Path::new("d")).await.unwrap();
        write(&backend, "d/f", b"x").await;

        backend.delete_file(Path::new("d/f")).await.unwrap();
        backend.delete_file(Path::new("d/f")).await.unwrap();
        backend.delete_dir(Path::new("d")).await.unwrap();
        backend.delete_dir(Path::new("d")).await.unwrap();
        assert!(!backend.exists(Path::new("d")).await.unwrap());
    }

    #[tokio::test]
    async fn rename_replaces_destination() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        write(&backend, "old", b"old").await;
        write(&backend, "new", b"new").await;

        backend.rename(Path::new("new"), Path::new("old")).await.unwrap();
        let bytes = backend.read_file(Path::new("old")).await.unwrap();
        assert_eq!(&bytes[..], b"new");
        assert!(!backend.exists(Path::new("new")).await.unwrap());
    }
}
