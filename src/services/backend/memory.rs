//! In-memory [`StorageBackend`] with fault injection, for tests.

use super::{StorageBackend, WriteHandle};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    mtimes: HashMap<PathBuf, SystemTime>,
    failing: HashSet<PathBuf>,
}

impl State {
    fn check(&self, path: &Path) -> io::Result<()> {
        if self.failing.iter().any(|f| path.starts_with(f)) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("injected failure for {}", path.display()),
            ));
        }
        Ok(())
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || self.dirs.contains(path)
    }

    fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        if self.dir_exists(parent) {
            Ok(())
        } else {
            Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", parent.display()),
            ))
        }
    }

    fn touch(&mut self, path: &Path) {
        let now = SystemTime::now();
        self.mtimes.insert(path.to_path_buf(), now);
        if let Some(parent) = path.parent() {
            self.mtimes.insert(parent.to_path_buf(), now);
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `path` or beneath it fail.
    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().failing.insert(path.into());
    }

    pub fn set_modified(&self, path: impl Into<PathBuf>, at: SystemTime) {
        self.state.lock().unwrap().mtimes.insert(path.into(), at);
    }

    /// Every file currently stored, for asserting on leftovers.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path.as_ref()).cloned()
    }
}

struct MemoryWriteHandle {
    state: Arc<Mutex<State>>,
    path: PathBuf,
}

#[async_trait]
impl WriteHandle for MemoryWriteHandle {
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check(&self.path)?;
        match state.files.get_mut(&self.path) {
            Some(file) => {
                file.extend_from_slice(bytes);
                Ok(())
            }
            None => Err(ErrorKind::NotFound.into()),
        }
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        self.state.lock().unwrap().check(&self.path)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.files.contains_key(path) || state.dir_exists(path))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check(path)?;
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || state.dirs.contains(ancestor) {
                continue;
            }
            state.dirs.insert(ancestor.to_path_buf());
            state.touch(ancestor);
        }
        Ok(())
    }

    async fn list_entries(&self, dir: &Path) -> io::Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.check(dir)?;
        if !state.dir_exists(dir) {
            return Err(ErrorKind::NotFound.into());
        }
        let children = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(children)
    }

    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        let state = self.state.lock().unwrap();
        state.check(path)?;
        state
            .files
            .get(path)
            .map(|bytes| Bytes::copy_from_slice(bytes))
            .ok_or_else(|| ErrorKind::NotFound.into())
    }

    async fn open_write(&self, path: &Path) -> io::Result<Box<dyn WriteHandle>> {
        let mut state = self.state.lock().unwrap();
        state.check(path)?;
        state.ensure_parent(path)?;
        state.files.insert(path.to_path_buf(), Vec::new());
        state.touch(path);
        Ok(Box::new(MemoryWriteHandle {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
        }))
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check(path)?;
        if state.files.remove(path).is_some() {
            state.mtimes.remove(path);
            state.touch(path.parent().unwrap_or(Path::new("")));
        }
        Ok(())
    }

    async fn delete_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check(path)?;
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p| !p.starts_with(path));
        state.mtimes.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check(src)?;
        state.check(dst)?;
        state.ensure_parent(dst)?;
        let bytes = state
            .files
            .remove(src)
            .ok_or_else(|| io::Error::from(ErrorKind::NotFound))?;
        state.files.insert(dst.to_path_buf(), bytes);
        state.mtimes.remove(src);
        state.touch(dst);
        Ok(())
    }

    async fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        let state = self.state.lock().unwrap();
        state
            .mtimes
            .get(path)
            .copied()
            .ok_or_else(|| ErrorKind::NotFound.into())
    }
}
