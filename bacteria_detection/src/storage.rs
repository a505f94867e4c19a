use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to store upload at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Scratch directory holding uploads while they are being processed.
#[derive(Debug, Clone)]
pub struct TransientStorage {
    dir: PathBuf,
}

impl TransientStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to a fresh file named after a random token and
    /// returns a guard that deletes it when dropped.
    pub fn store(&self, bytes: &[u8], extension: &str) -> Result<TransientFile, StorageError> {
        let path = self
            .dir
            .join(format!("upload-{}{}", Uuid::new_v4().simple(), extension));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        // The file is ours from here on, so a failed write is cleaned up too.
        let transient = TransientFile { path };
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|source| StorageError::Write {
                path: transient.path.clone(),
                source,
            })?;

        tracing::debug!("Stored {} bytes at {:?}", bytes.len(), transient.path);
        Ok(transient)
    }
}

/// A stored upload. The file is removed exactly once, when the guard drops.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed temp file {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not clean up temp file {:?}: {}", self.path, e),
        }
    }
}
