//! CLI subprocess integration tests.
//!
//! These tests invoke the `devstack` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output. Commands that reach git or docker
//! run with the scripted `mock` backend, where every clone fails and each
//! service is therefore rendered as a mock.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn devstack_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_devstack"));
    cmd.env("DEVSTACK_SKIP_PREREQS", "1");
    cmd.env_remove("DEVSTACK_LOG");
    cmd
}

const REGISTRY: &str = r#"
registry_version = 1

[project]
name = "acme"

[settings]
workers = 2

[[services]]
name = "datasource"
url = "https://git.example.com/acme/datasource.git"
port = 8080
depends_on = ["postgres"]

[[services]]
name = "ingestor"
url = "https://git.example.com/acme/ingestor.git"
port = 8090
depends_on = ["datasource"]

[[services]]
name = "ui"
url = "https://git.example.com/acme/ui.git"
port = 3000
depends_on = ["ingestor"]
mock_image = "nginx:alpine"
"#;

fn write_registry(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("devstack.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    devstack_bin()
        .arg("--workspace")
        .arg(dir)
        .arg("--backend")
        .arg("mock")
        .args(args)
        .output()
        .unwrap()
}

fn json_stdout(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

#[test]
fn cli_version_exits_zero() {
    let output = devstack_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("devstack"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let output = devstack_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["validate", "reconcile", "up", "generate", "status", "down", "prune", "doctor"] {
        assert!(stdout.contains(cmd), "help must list '{cmd}': {stdout}");
    }
    assert!(!stdout.contains("--backend"), "backend flag is hidden");
}

#[test]
fn cli_unknown_command_fails() {
    let output = devstack_bin().arg("explode").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_validate_reports_startup_order() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["validate"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 service(s)"), "{stdout}");
    assert!(stdout.contains("postgres -> datasource -> ingestor -> ui"), "{stdout}");
}

#[test]
fn cli_validate_json() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["validate", "--json"]);
    assert!(output.status.success());
    let json = json_stdout(&output);
    assert_eq!(json["valid"], true);
    assert_eq!(json["project"], "acme");
    assert_eq!(json["startup_order"][0], "datasource");
    assert_eq!(json["startup_order"][2], "ui");
}

#[test]
fn cli_missing_registry_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("registry error:"), "{stderr}");
}

#[test]
fn cli_malformed_registry_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), "registry_version = 1\n[project]\nname = \"x\"\ncolour = 1\n");
    let output = run_in(dir.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_cyclic_registry_exits_two_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(
        dir.path(),
        r#"
registry_version = 1
[project]
name = "loop"

[[services]]
name = "a"
url = "https://git.example.com/a.git"
port = 1
depends_on = ["b"]

[[services]]
name = "b"
url = "https://git.example.com/b.git"
port = 2
depends_on = ["a"]
"#,
    );
    let output = run_in(dir.path(), &["reconcile"]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    assert!(!dir.path().join("docker-compose.yml").exists());
}

#[test]
fn cli_reconcile_mock_backend_renders_all_mocks() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["reconcile", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["project"], "acme");
    assert_eq!(json["real"], 0);
    assert_eq!(json["mock"], 3);
    assert_eq!(json["services"].as_array().unwrap().len(), 3);
    for svc in json["services"].as_array().unwrap() {
        assert_eq!(svc["state"], "Missing");
    }

    let compose = std::fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
    assert!(compose.contains("postgres:"));
    assert!(compose.contains("nginx:alpine"));
    assert!(dir.path().join("_failsafe").join("Dockerfile").exists());
}

#[test]
fn cli_reconcile_human_output() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["reconcile"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SERVICE"), "{stdout}");
    assert!(stdout.contains("ingestor"), "{stdout}");
    assert!(stdout.contains("docker-compose.yml"), "{stdout}");
}

#[test]
fn cli_generate_print_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let first = run_in(dir.path(), &["generate", "--print"]);
    assert!(first.status.success(), "{first:?}");
    let second = run_in(dir.path(), &["generate", "--print"]);
    assert_eq!(first.stdout, second.stdout);

    let yaml = String::from_utf8_lossy(&first.stdout);
    let on_disk = std::fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
    assert_eq!(yaml, on_disk);
    assert!(yaml.find("datasource:").unwrap() < yaml.find("ui:").unwrap());
}

#[test]
fn cli_status_json_before_and_after_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);

    let before = run_in(dir.path(), &["status", "--json"]);
    assert!(before.status.success(), "{before:?}");
    let json = json_stdout(&before);
    assert_eq!(json["manifest_present"], false);
    assert!(json["services"][0]["state"].is_null());

    assert!(run_in(dir.path(), &["reconcile"]).status.success());

    let after = run_in(dir.path(), &["status", "--json"]);
    let json = json_stdout(&after);
    assert_eq!(json["manifest_present"], true);
    assert_eq!(json["services"][0]["service"], "datasource");
    assert_eq!(json["services"][0]["state"], "Missing");
    assert_eq!(json["services"][0]["rendering"]["kind"], "mock");
    assert_eq!(json["services"][0]["container"], "not-created");
}

#[test]
fn cli_prune_removes_unregistered_state() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    assert!(run_in(dir.path(), &["reconcile"]).status.success());

    let trimmed = REGISTRY.split("[[services]]\nname = \"ui\"").next().unwrap();
    write_registry(dir.path(), trimmed);

    let output = run_in(dir.path(), &["prune", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["removed"], serde_json::json!(["ui"]));

    let again = run_in(dir.path(), &["prune"]);
    assert!(String::from_utf8_lossy(&again.stdout).contains("nothing to prune"));
}

#[test]
fn cli_up_and_down_with_mock_backend() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let up = run_in(dir.path(), &["up", "--json"]);
    assert!(up.status.success(), "{up:?}");
    assert_eq!(json_stdout(&up)["applied"], true);

    let down = run_in(dir.path(), &["down", "--json"]);
    assert!(down.status.success(), "{down:?}");
    assert_eq!(json_stdout(&down)["stopped"], true);
}

#[test]
fn cli_doctor_json_is_structured() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["doctor", "--json"]);
    // Health depends on whether git and docker are installed on the host.
    assert!(matches!(output.status.code(), Some(0 | 1)));
    let json = json_stdout(&output);
    assert!(json["healthy"].is_boolean());
    let checks = json["checks"].as_array().unwrap();
    let registry = checks.iter().find(|c| c["name"] == "registry").unwrap();
    assert_eq!(registry["status"], "pass");
}

#[test]
fn cli_completions_bash() {
    let output = devstack_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("devstack"));
}

#[test]
fn cli_generate_json_summary() {
    let dir = tempfile::tempdir().unwrap();
    write_registry(dir.path(), REGISTRY);
    let output = run_in(dir.path(), &["generate", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["real"], 0);
    assert_eq!(json["mock"], 3);
    assert_eq!(json["failsafe_build"], true);
    assert_eq!(json["services"]["ui"]["kind"], "mock");
    assert_eq!(json["services"]["ui"]["image"], "nginx:alpine");
}
