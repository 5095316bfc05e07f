use crate::RuntimeError;
use devstack_schema::{ImageRef, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Source-control operations the acquirer needs.
///
/// Every method either succeeds or returns an error the caller classifies;
/// implementations never panic on tool failure.
pub trait VcsBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Whether `dir` holds a checkout this backend can update.
    fn is_checkout(&self, dir: &Path) -> bool;

    /// Clone `url` at `branch` into `dest`, which must not exist yet.
    fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Bring an existing checkout up to the latest `branch` without
    /// discarding local changes. Fails rather than forcing.
    fn update(&self, dir: &Path, branch: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Full revision identifier of the checkout's current `HEAD`.
    fn head_revision(&self, dir: &Path) -> Result<Revision, RuntimeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRequest {
    pub context: PathBuf,
    /// Build file path, already joined onto `context`.
    pub dockerfile: PathBuf,
    pub tag: ImageRef,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Produces container images from a build context.
pub trait ImageBuilder: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn build(&self, request: &BuildRequest) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerState {
    Running,
    Stopped,
    NotCreated,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::NotCreated => write!(f, "not created"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub service: String,
    pub state: ContainerState,
}

/// Applies a generated manifest to the container runtime.
pub trait ComposeDriver: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Create or update every container described by the manifest in
    /// `project_dir`, removing orphans.
    fn up(&self, project_dir: &Path, timeout: Duration) -> Result<(), RuntimeError>;

    fn down(&self, project_dir: &Path, timeout: Duration) -> Result<(), RuntimeError>;

    /// Containers known to the runtime for this project.
    fn ps(&self, project_dir: &Path) -> Result<Vec<ContainerStatus>, RuntimeError>;
}

/// The backends one reconciliation run talks to.
pub struct Backends {
    pub vcs: Box<dyn VcsBackend>,
    pub builder: Box<dyn ImageBuilder>,
    pub compose: Box<dyn ComposeDriver>,
}

pub fn select_backends(name: &str) -> Result<Backends, RuntimeError> {
    match name {
        "docker" => Ok(Backends {
            vcs: Box::new(crate::git::GitCli::new()),
            builder: Box::new(crate::docker::DockerBuilder::new()),
            compose: Box::new(crate::docker::DockerCompose::new()),
        }),
        "mock" => Ok(Backends {
            vcs: Box::new(crate::mock::ScriptedVcs::new()),
            builder: Box::new(crate::mock::ScriptedBuilder::new()),
            compose: Box::new(crate::mock::RecordingCompose::new()),
        }),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
