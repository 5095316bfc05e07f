use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current state format version. Incremented on incompatible record changes.
pub const STATE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";
const COMPOSE_FILE: &str = "docker-compose.yml";

/// Directory layout of a devstack workspace.
///
/// ```text
/// <root>/
///   docker-compose.yml      generated manifest
///   _failsafe/Dockerfile    built-in stand-in image
///   services/<name>/        one isolated checkout per service
///   .devstack/state/        one state record per service
///   .devstack/.lock         workspace lock
/// ```
///
/// All subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVersion {
    format_version: u32,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    /// The checkout directory owned by a single service. Nothing outside
    /// this directory is touched on that service's behalf.
    #[inline]
    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.services_dir().join(name)
    }

    #[inline]
    pub fn control_dir(&self) -> PathBuf {
        self.root.join(".devstack")
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.control_dir().join("state")
    }

    #[inline]
    pub fn failsafe_dir(&self) -> PathBuf {
        self.root.join("_failsafe")
    }

    #[inline]
    pub fn failsafe_dockerfile(&self) -> PathBuf {
        self.failsafe_dir().join("Dockerfile")
    }

    #[inline]
    pub fn compose_file(&self) -> PathBuf {
        self.root.join(COMPOSE_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.control_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.services_dir())?;
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(self.failsafe_dir())?;

        let version_path = self.control_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StateVersion {
                format_version: STATE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            write_atomic(&version_path, content.as_bytes())?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.control_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StateVersion = serde_json::from_str(&content)?;

        if ver.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
