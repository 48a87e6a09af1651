//! File storage seam for the edit manager
//!
//! The edit manager only ever talks to a [`FileStore`]; tests swap in stores
//! that fail on demand.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Abstract file primitives used by edit transactions
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file as UTF-8. `Ok(None)` if it does not exist.
    async fn read(&self, path: &Path) -> io::Result<Option<String>>;

    /// Write (create or replace) a file, creating parent directories.
    async fn write(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Remove a file. Removing a missing file is not an error.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    /// Create the missing ancestor directories of `path`, returning the ones
    /// created, outermost first. Stores without directories create nothing.
    async fn create_parents(&self, _path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    /// Remove a directory if it is empty.
    async fn remove_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// [`FileStore`] backed by the local filesystem
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// single file is never observed half-written.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &Path) -> io::Result<Option<String>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file is not valid UTF-8")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let tmp = path.with_file_name(format!(
            ".{}.wren-{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_parents(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current.as_os_str().is_empty() || tokio::fs::try_exists(current).await? {
                break;
            }
            missing.push(current.to_path_buf());
            dir = current.parent();
        }
        missing.reverse();

        for created in &missing {
            match tokio::fs::create_dir(created).await {
                Err(e) if e.kind() != io::ErrorKind::AlreadyExists => return Err(e),
                _ => {}
            }
        }
        Ok(missing)
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
