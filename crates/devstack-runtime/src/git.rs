use crate::backend::VcsBackend;
use crate::process::{run_checked, run_with_timeout};
use crate::RuntimeError;
use devstack_schema::Revision;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const REV_PARSE_TIMEOUT: Duration = Duration::from_secs(30);

/// [`VcsBackend`] driving the `git` command-line client.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_owned(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        // Never block on a credential prompt; an auth failure is a classification input.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }
}

impl VcsBackend for GitCli {
    fn name(&self) -> &'static str {
        "git"
    }

    fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn is_checkout(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["clone", "--branch", branch, "--", url])
            .arg(dest);
        run_checked(&mut cmd, timeout)?;
        Ok(())
    }

    fn update(&self, dir: &Path, branch: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["pull", "--ff-only", "origin", branch])
            .current_dir(dir);
        run_checked(&mut cmd, timeout)?;
        Ok(())
    }

    fn head_revision(&self, dir: &Path) -> Result<Revision, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["rev-parse", "HEAD"]).current_dir(dir);
        let output = run_with_timeout(&mut cmd, REV_PARSE_TIMEOUT)?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: "git rev-parse HEAD".to_owned(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if sha.is_empty() {
            return Err(RuntimeError::UnexpectedOutput(
                "git rev-parse HEAD returned empty output".to_owned(),
            ));
        }
        Ok(Revision::new(sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        GitCli::new().available()
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_origin() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "initial"]);
        dir
    }

    #[test]
    fn clone_update_and_rev_parse() {
        if !git_available() {
            return;
        }
        let origin = make_origin();
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("svc");
        let git = GitCli::new();

        git.clone_repo(
            &origin.path().to_string_lossy(),
            "main",
            &dest,
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(git.is_checkout(&dest));
        let first = git.head_revision(&dest).unwrap();
        assert_eq!(first.len(), 40);

        run_git(origin.path(), &["commit", "--allow-empty", "-m", "second"]);
        git.update(&dest, "main", Duration::from_secs(60)).unwrap();
        let second = git.head_revision(&dest).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn clone_of_missing_remote_fails() {
        if !git_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let err = GitCli::new()
            .clone_repo(
                &work.path().join("nope").to_string_lossy(),
                "main",
                &work.path().join("svc"),
                Duration::from_secs(30),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
    }

    #[test]
    fn rev_parse_outside_repo_fails() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        assert!(GitCli::new().head_revision(dir.path()).is_err());
    }
}
