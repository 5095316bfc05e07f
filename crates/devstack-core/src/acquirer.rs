use devstack_runtime::VcsBackend;
use devstack_schema::{Revision, ServiceSpec};
use devstack_store::{RepoState, WorkspaceLayout};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of bringing one service's source tree up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireOutcome {
    /// `Missing`, `Cloned`, or `OutOfDate`.
    pub state: RepoState,
    pub revision: Option<Revision>,
    /// Why acquisition fell short, for the run report.
    pub detail: Option<String>,
    pub checkout: PathBuf,
}

impl AcquireOutcome {
    fn missing(checkout: PathBuf, detail: String) -> Self {
        Self {
            state: RepoState::Missing,
            revision: None,
            detail: Some(detail),
            checkout,
        }
    }

    fn cloned(checkout: PathBuf, revision: Revision) -> Self {
        Self {
            state: RepoState::Cloned,
            revision: Some(revision),
            detail: None,
            checkout,
        }
    }
}

/// Clones or updates service checkouts under `<workspace>/services/`.
///
/// Never fails: every VCS error is folded into the returned classification.
/// Only the service's own directory is ever written.
pub struct Acquirer<'a> {
    vcs: &'a dyn VcsBackend,
    layout: &'a WorkspaceLayout,
    timeout: Duration,
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

impl<'a> Acquirer<'a> {
    pub fn new(vcs: &'a dyn VcsBackend, layout: &'a WorkspaceLayout, timeout: Duration) -> Self {
        Self {
            vcs,
            layout,
            timeout,
        }
    }

    pub fn acquire(&self, spec: &ServiceSpec) -> AcquireOutcome {
        let dir = self.layout.service_dir(&spec.name);

        if dir.exists() && !self.vcs.is_checkout(&dir) {
            if is_empty_dir(&dir) {
                debug!("{}: removing empty directory before clone", spec.name);
                if let Err(e) = fs::remove_dir(&dir) {
                    return AcquireOutcome::missing(dir, format!("cannot reuse empty directory: {e}"));
                }
            } else {
                warn!(
                    "{}: {} exists but is not a checkout; leaving it untouched",
                    spec.name,
                    dir.display()
                );
                return AcquireOutcome::missing(
                    dir,
                    "directory exists but is not a git checkout".to_owned(),
                );
            }
        }

        if dir.exists() {
            self.update(spec, dir)
        } else {
            self.clone_fresh(spec, dir)
        }
    }

    fn clone_fresh(&self, spec: &ServiceSpec, dir: PathBuf) -> AcquireOutcome {
        if let Err(e) = fs::create_dir_all(self.layout.services_dir()) {
            return AcquireOutcome::missing(dir, format!("cannot create services directory: {e}"));
        }
        info!("{}: cloning {} ({})", spec.name, spec.url, spec.branch);
        if let Err(e) = self
            .vcs
            .clone_repo(&spec.url, &spec.branch, &dir, self.timeout)
        {
            warn!("{}: clone failed: {e}", spec.name);
            if dir.exists() {
                if let Err(rm) = fs::remove_dir_all(&dir) {
                    warn!("{}: failed to remove partial clone: {rm}", spec.name);
                }
            }
            let what = if e.is_timeout() { "clone timed out" } else { "clone failed" };
            return AcquireOutcome::missing(dir, format!("{what}: {e}"));
        }
        match self.vcs.head_revision(&dir) {
            Ok(rev) => {
                debug!("{}: cloned at {}", spec.name, rev.short());
                AcquireOutcome::cloned(dir, rev)
            }
            Err(e) => AcquireOutcome::missing(dir, format!("cannot resolve revision: {e}")),
        }
    }

    fn update(&self, spec: &ServiceSpec, dir: PathBuf) -> AcquireOutcome {
        debug!("{}: updating {}", spec.name, spec.branch);
        let update_err = self
            .vcs
            .update(&dir, &spec.branch, self.timeout)
            .err();
        let revision = match self.vcs.head_revision(&dir) {
            Ok(rev) => rev,
            Err(e) => {
                return AcquireOutcome::missing(dir, format!("cannot resolve revision: {e}"));
            }
        };
        match update_err {
            None => AcquireOutcome::cloned(dir, revision),
            Some(e) => {
                warn!(
                    "{}: update failed, keeping local {}: {e}",
                    spec.name,
                    revision.short()
                );
                AcquireOutcome {
                    state: RepoState::OutOfDate,
                    revision: Some(revision),
                    detail: Some(if e.is_timeout() {
                        format!("update timed out: {e}")
                    } else {
                        format!("update failed: {e}")
                    }),
                    checkout: dir,
                }
            }
        }
    }
}
