//! Workspace layout and durable per-service state for devstack.
//!
//! This crate provides the storage layer: `WorkspaceLayout` for the on-disk
//! workspace structure, the `StateStore` trait over `PersistentServiceState`
//! records, a file-backed implementation with atomic per-key writes and
//! checksummed records (`FileStateStore`), an in-memory substitute
//! (`MemoryStateStore`), and the per-key lock table both use to serialize
//! writers.

pub mod file;
pub mod keylock;
pub mod layout;
pub mod memory;
pub mod state;

pub use file::FileStateStore;
pub use keylock::KeyLocks;
pub use layout::{WorkspaceLayout, STATE_FORMAT_VERSION};
pub use memory::MemoryStateStore;
pub use state::{PersistentServiceState, RepoState, StateMap, StateStore};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` so that readers observe either the old or
/// the new file, never a partial write.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for state of '{service}': expected {expected}, got {actual}")]
    IntegrityFailure {
        service: String,
        expected: String,
        actual: String,
    },
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid service key: {0}")]
    InvalidKey(String),
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
