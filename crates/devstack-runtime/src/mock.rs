//! Scripted backends that stand in for `git` and `docker`.
//!
//! Handles are cheap clones sharing one script, so a test can keep a copy,
//! hand another to the engine, and change or inspect the script between passes.

use crate::backend::{BuildRequest, ComposeDriver, ContainerStatus, ImageBuilder, VcsBackend};
use crate::RuntimeError;
use devstack_schema::Revision;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const ORIGIN_FILE: &str = "origin";
const HEAD_FILE: &str = "HEAD";
const DEFAULT_DOCKERFILE: &str = "FROM scratch\n";

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, RuntimeError> {
    m.lock()
        .map_err(|e| RuntimeError::UnexpectedOutput(format!("mock mutex poisoned: {e}")))
}

fn scripted_timeout(command: &str, timeout: Duration) -> RuntimeError {
    RuntimeError::Timeout {
        command: command.to_owned(),
        secs: timeout.as_secs(),
    }
}

fn scripted_failure(command: &str, reason: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: command.to_owned(),
        code: Some(128),
        stderr: reason.to_owned(),
    }
}

#[derive(Debug, Default)]
struct Remote {
    revision: Option<Revision>,
    dockerfile: Option<String>,
    fail_clone: bool,
    fail_update: bool,
    stall_clone: bool,
    stall_update: bool,
}

#[derive(Debug, Default)]
struct VcsScript {
    remotes: BTreeMap<String, Remote>,
    clones: usize,
    updates: usize,
}

/// [`VcsBackend`] whose remotes live in memory.
///
/// A checkout is a directory holding `.git/origin` (the url) and `.git/HEAD`
/// (the revision), plus a `Dockerfile` taken from the remote's script.
/// Cloning an unscripted url fails like a nonexistent remote.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVcs {
    script: Arc<Mutex<VcsScript>>,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_remote<R>(&self, url: &str, f: impl FnOnce(&mut Remote) -> R) -> R {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(script.remotes.entry(url.to_owned()).or_default())
    }

    /// Move the remote's branch tip to `revision`.
    pub fn set_revision(&self, url: &str, revision: &str) {
        self.with_remote(url, |r| r.revision = Some(Revision::new(revision)));
    }

    /// Content of the build file checked out from `url`.
    pub fn set_dockerfile(&self, url: &str, content: &str) {
        self.with_remote(url, |r| r.dockerfile = Some(content.to_owned()));
    }

    /// Commit a tree without any build file.
    pub fn remove_dockerfile(&self, url: &str) {
        self.with_remote(url, |r| r.dockerfile = Some(String::new()));
    }

    pub fn fail_clone(&self, url: &str, fail: bool) {
        self.with_remote(url, |r| r.fail_clone = fail);
    }

    pub fn fail_update(&self, url: &str, fail: bool) {
        self.with_remote(url, |r| r.fail_update = fail);
    }

    /// Make clones of `url` run past their deadline.
    pub fn stall_clone(&self, url: &str, stall: bool) {
        self.with_remote(url, |r| r.stall_clone = stall);
    }

    /// Make updates of `url` run past their deadline.
    pub fn stall_update(&self, url: &str, stall: bool) {
        self.with_remote(url, |r| r.stall_update = stall);
    }

    pub fn clone_count(&self) -> usize {
        self.script.lock().map(|s| s.clones).unwrap_or(0)
    }

    pub fn update_count(&self) -> usize {
        self.script.lock().map(|s| s.updates).unwrap_or(0)
    }

    fn checkout(dir: &Path, url: &str, revision: &Revision, dockerfile: &str) -> Result<(), RuntimeError> {
        let meta = dir.join(".git");
        fs::create_dir_all(&meta)?;
        fs::write(meta.join(ORIGIN_FILE), url)?;
        fs::write(meta.join(HEAD_FILE), revision.as_str())?;
        let build_file = dir.join("Dockerfile");
        if dockerfile.is_empty() {
            if build_file.exists() {
                fs::remove_file(&build_file)?;
            }
        } else {
            fs::write(build_file, dockerfile)?;
        }
        Ok(())
    }
}

impl VcsBackend for ScriptedVcs {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn available(&self) -> bool {
        true
    }

    fn is_checkout(&self, dir: &Path) -> bool {
        dir.join(".git").join(HEAD_FILE).is_file()
    }

    fn clone_repo(
        &self,
        url: &str,
        _branch: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let (revision, dockerfile) = {
            let mut script = lock(&self.script)?;
            script.clones += 1;
            let remote = script.remotes.get(url);
            match remote {
                Some(r) if r.stall_clone => {
                    // A killed clone leaves its partial directory behind too.
                    fs::create_dir_all(dest)?;
                    return Err(scripted_timeout("git clone", timeout));
                }
                Some(r) if r.fail_clone => {
                    // Leave a partial directory behind, as an interrupted clone would.
                    fs::create_dir_all(dest)?;
                    return Err(scripted_failure("git clone", "fatal: unable to access remote"));
                }
                Some(Remote {
                    revision: Some(rev),
                    dockerfile,
                    ..
                }) => (
                    rev.clone(),
                    dockerfile.clone().unwrap_or_else(|| DEFAULT_DOCKERFILE.to_owned()),
                ),
                _ => {
                    return Err(scripted_failure(
                        "git clone",
                        &format!("fatal: repository '{url}' not found"),
                    ))
                }
            }
        };
        if dest.exists() {
            return Err(scripted_failure(
                "git clone",
                "fatal: destination path already exists",
            ));
        }
        Self::checkout(dest, url, &revision, &dockerfile)
    }

    fn update(&self, dir: &Path, _branch: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let url = fs::read_to_string(dir.join(".git").join(ORIGIN_FILE))?;
        let (revision, dockerfile) = {
            let mut script = lock(&self.script)?;
            script.updates += 1;
            match script.remotes.get(&url) {
                Some(r) if r.stall_update => return Err(scripted_timeout("git pull", timeout)),
                Some(r) if r.fail_update => {
                    return Err(scripted_failure(
                        "git pull",
                        "fatal: Not possible to fast-forward, aborting.",
                    ))
                }
                Some(Remote {
                    revision: Some(rev),
                    dockerfile,
                    ..
                }) => (
                    rev.clone(),
                    dockerfile.clone().unwrap_or_else(|| DEFAULT_DOCKERFILE.to_owned()),
                ),
                _ => {
                    return Err(scripted_failure(
                        "git pull",
                        "fatal: could not read from remote repository",
                    ))
                }
            }
        };
        Self::checkout(dir, &url, &revision, &dockerfile)
    }

    fn head_revision(&self, dir: &Path) -> Result<Revision, RuntimeError> {
        let head = fs::read_to_string(dir.join(".git").join(HEAD_FILE))?;
        Ok(Revision::new(head.trim()))
    }
}

#[derive(Debug, Default)]
struct BuildScript {
    requests: Vec<BuildRequest>,
    failing_prefixes: BTreeSet<String>,
    stalling_prefixes: BTreeSet<String>,
}

/// [`ImageBuilder`] that records every request instead of building.
///
/// A build fails when the build file is absent or a placeholder, or when the
/// tag starts with a prefix registered through [`fail_tag_prefix`](Self::fail_tag_prefix).
/// Tags matching [`stall_tag_prefix`](Self::stall_tag_prefix) run past the
/// request's timeout.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBuilder {
    script: Arc<Mutex<BuildScript>>,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_tag_prefix(&self, prefix: &str) {
        if let Ok(mut s) = self.script.lock() {
            s.failing_prefixes.insert(prefix.to_owned());
        }
    }

    pub fn stall_tag_prefix(&self, prefix: &str) {
        if let Ok(mut s) = self.script.lock() {
            s.stalling_prefixes.insert(prefix.to_owned());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut s) = self.script.lock() {
            s.failing_prefixes.clear();
            s.stalling_prefixes.clear();
        }
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<BuildRequest> {
        self.script
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn build_count(&self) -> usize {
        self.script.lock().map(|s| s.requests.len()).unwrap_or(0)
    }
}

impl ImageBuilder for ScriptedBuilder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn available(&self) -> bool {
        true
    }

    fn build(&self, request: &BuildRequest) -> Result<(), RuntimeError> {
        let (failing, stalling) = {
            let mut script = lock(&self.script)?;
            script.requests.push(request.clone());
            let matches =
                |set: &BTreeSet<String>| set.iter().any(|p| request.tag.starts_with(p.as_str()));
            (
                matches(&script.failing_prefixes),
                matches(&script.stalling_prefixes),
            )
        };
        if !request.dockerfile.is_file() {
            return Err(RuntimeError::BuildFileMissing(
                request.dockerfile.display().to_string(),
            ));
        }
        if crate::failsafe::is_failsafe_dockerfile(&request.dockerfile) {
            return Err(RuntimeError::PlaceholderBuildFile(
                request.dockerfile.display().to_string(),
            ));
        }
        if stalling {
            return Err(scripted_timeout(
                &format!("docker build -t {}", request.tag),
                request.timeout,
            ));
        }
        if failing {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker build -t {}", request.tag),
                code: Some(1),
                stderr: "scripted build failure".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ComposeScript {
    calls: Vec<String>,
    containers: Vec<ContainerStatus>,
    fail: bool,
}

/// [`ComposeDriver`] that records calls and reports scripted containers.
#[derive(Debug, Clone, Default)]
pub struct RecordingCompose {
    script: Arc<Mutex<ComposeScript>>,
}

impl RecordingCompose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_containers(&self, containers: Vec<ContainerStatus>) {
        if let Ok(mut s) = self.script.lock() {
            s.containers = containers;
        }
    }

    pub fn set_failing(&self, fail: bool) {
        if let Ok(mut s) = self.script.lock() {
            s.fail = fail;
        }
    }

    /// Calls made so far, e.g. `["up", "down"]`.
    pub fn calls(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: &str) -> Result<(), RuntimeError> {
        let mut script = lock(&self.script)?;
        script.calls.push(call.to_owned());
        if script.fail {
            return Err(scripted_failure(&format!("docker compose {call}"), "scripted failure"));
        }
        Ok(())
    }
}

impl ComposeDriver for RecordingCompose {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn available(&self) -> bool {
        true
    }

    fn up(&self, _project_dir: &Path, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record("up")
    }

    fn down(&self, _project_dir: &Path, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record("down")
    }

    fn ps(&self, _project_dir: &Path) -> Result<Vec<ContainerStatus>, RuntimeError> {
        self.record("ps")?;
        Ok(lock(&self.script)?.containers.clone())
    }
}
