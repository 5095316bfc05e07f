use crate::backend::{BuildRequest, ComposeDriver, ContainerState, ContainerStatus, ImageBuilder};
use crate::failsafe::is_failsafe_dockerfile;
use crate::process::{run_checked, run_with_timeout};
use crate::RuntimeError;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const PS_TIMEOUT: Duration = Duration::from_secs(60);

fn docker_runs(args: &[&str]) -> bool {
    Command::new("docker")
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// [`ImageBuilder`] shelling out to `docker build`.
#[derive(Debug, Default, Clone)]
pub struct DockerBuilder;

impl DockerBuilder {
    pub fn new() -> Self {
        Self
    }

    fn command(request: &BuildRequest) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("build")
            .arg("-t")
            .arg(request.tag.as_str())
            .arg("-f")
            .arg(&request.dockerfile);
        for (key, value) in &request.build_args {
            cmd.arg("--build-arg").arg(format!("{key}={value}"));
        }
        cmd.arg(&request.context);
        cmd
    }
}

impl ImageBuilder for DockerBuilder {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        docker_runs(&["--version"])
    }

    fn build(&self, request: &BuildRequest) -> Result<(), RuntimeError> {
        if !request.dockerfile.is_file() {
            return Err(RuntimeError::BuildFileMissing(
                request.dockerfile.display().to_string(),
            ));
        }
        if is_failsafe_dockerfile(&request.dockerfile) {
            return Err(RuntimeError::PlaceholderBuildFile(
                request.dockerfile.display().to_string(),
            ));
        }
        run_checked(&mut Self::command(request), request.timeout)?;
        tracing::info!("built image {}", request.tag);
        Ok(())
    }
}

/// [`ComposeDriver`] shelling out to the `docker compose` plugin.
#[derive(Debug, Default, Clone)]
pub struct DockerCompose;

impl DockerCompose {
    pub fn new() -> Self {
        Self
    }

    fn command(project_dir: &Path) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("--project-directory")
            .arg(project_dir)
            .arg("-f")
            .arg(project_dir.join("docker-compose.yml"));
        cmd
    }
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
}

impl From<PsEntry> for ContainerStatus {
    fn from(entry: PsEntry) -> Self {
        let state = if entry.state.eq_ignore_ascii_case("running") {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        };
        ContainerStatus {
            service: entry.service,
            state,
        }
    }
}

/// Parse `docker compose ps --format json`. Older releases print one JSON
/// array, newer ones one object per line; both are accepted.
pub fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerStatus>, RuntimeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| RuntimeError::UnexpectedOutput(format!("compose ps: {e}")))?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| RuntimeError::UnexpectedOutput(format!("compose ps: {e}")))?
    };
    let mut statuses: Vec<ContainerStatus> = entries.into_iter().map(Into::into).collect();
    statuses.sort_by(|a, b| a.service.cmp(&b.service));
    Ok(statuses)
}

impl ComposeDriver for DockerCompose {
    fn name(&self) -> &'static str {
        "docker-compose"
    }

    fn available(&self) -> bool {
        docker_runs(&["compose", "version"])
    }

    fn up(&self, project_dir: &Path, timeout: Duration) -> Result<(), RuntimeError> {
        let mut cmd = Self::command(project_dir);
        cmd.args(["up", "-d", "--build", "--remove-orphans"]);
        run_checked(&mut cmd, timeout)?;
        Ok(())
    }

    fn down(&self, project_dir: &Path, timeout: Duration) -> Result<(), RuntimeError> {
        let mut cmd = Self::command(project_dir);
        cmd.args(["down", "--remove-orphans"]);
        run_checked(&mut cmd, timeout)?;
        Ok(())
    }

    fn ps(&self, project_dir: &Path) -> Result<Vec<ContainerStatus>, RuntimeError> {
        let mut cmd = Self::command(project_dir);
        cmd.args(["ps", "-a", "--format", "json"]);
        let output = run_with_timeout(&mut cmd, PS_TIMEOUT)?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: "docker compose ps".to_owned(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }
}
