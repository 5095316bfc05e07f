//! External tool backends for devstack.
//!
//! This crate is the only place that spawns processes: the `git` client used to
//! acquire service sources, the `docker build` image builder used to probe them,
//! and the `docker compose` driver that applies a generated manifest. Each sits
//! behind a trait so the engine can run against scripted backends in tests.
//! Every spawned command runs under a timeout and is killed when it expires.

pub mod backend;
pub mod docker;
pub mod failsafe;
pub mod git;
pub mod mock;
pub mod prereq;
pub mod process;

pub use backend::{
    select_backends, Backends, BuildRequest, ComposeDriver, ContainerState, ContainerStatus,
    ImageBuilder, VcsBackend,
};
pub use docker::{DockerBuilder, DockerCompose};
pub use failsafe::{is_failsafe_dockerfile, FAILSAFE_DOCKERFILE, FAILSAFE_MARKER};
pub use git::GitCli;
pub use prereq::{check_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("required tool '{0}' was not found on PATH")]
    ToolMissing(String),
    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("'{command}' failed (exit code {}): {stderr}", code.map_or_else(|| "signal".to_owned(), |c| c.to_string()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected tool output: {0}")]
    UnexpectedOutput(String),
    #[error("build file not found: {0}")]
    BuildFileMissing(String),
    #[error("build file is a failsafe placeholder: {0}")]
    PlaceholderBuildFile(String),
}

impl RuntimeError {
    /// Whether the error came from a command exceeding its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}
