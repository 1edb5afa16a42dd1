//! Per-session temporary file storage

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Scratch storage errors
#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("Invalid scratch file name: {0:?}")]
    InvalidName(String),

    #[error("Scratch I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Temporary files owned by sessions.
///
/// Methods block on the filesystem; callers run them on the blocking pool.
pub trait ScratchSpace: Send + Sync {
    /// Store `bytes` under `name` for a session, returning where it landed
    fn persist(&self, session_id: &str, name: &str, bytes: &[u8]) -> Result<PathBuf, ScratchError>;

    /// Delete one stored file. A file that is already gone is not an error.
    fn remove(&self, session_id: &str, name: &str) -> Result<(), ScratchError>;

    /// Drop everything stored for a session
    fn release(&self, session_id: &str) -> Result<(), ScratchError>;
}

/// Scratch space backed by `<root>/<session_id>/` directories
pub struct DiskScratch {
    root: PathBuf,
}

impl DiskScratch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }
}

/// Keep only the final path component so client-supplied names cannot escape
fn sanitize(name: &str) -> Result<&str, ScratchError> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ScratchError::InvalidName(name.to_string()))
}

impl ScratchSpace for DiskScratch {
    fn persist(&self, session_id: &str, name: &str, bytes: &[u8]) -> Result<PathBuf, ScratchError> {
        let dir = self.session_dir(sanitize(session_id)?);
        std::fs::create_dir_all(&dir).map_err(|source| ScratchError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(sanitize(name)?);
        std::fs::write(&path, bytes).map_err(|source| ScratchError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Persisted {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    fn remove(&self, session_id: &str, name: &str) -> Result<(), ScratchError> {
        let path = self.session_dir(sanitize(session_id)?).join(sanitize(name)?);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed scratch file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScratchError::Io { path, source }),
        }
    }

    fn release(&self, session_id: &str) -> Result<(), ScratchError> {
        let dir = self.session_dir(sanitize(session_id)?);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Removed scratch directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScratchError::Io { path: dir, source }),
        }
    }
}
