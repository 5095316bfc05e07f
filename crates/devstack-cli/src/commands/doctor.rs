use super::{EXIT_FAILURE, EXIT_SUCCESS};
use devstack_core::WorkspaceLock;
use devstack_store::{FileStateStore, WorkspaceLayout};
use std::path::Path;

pub fn run(workspace: &Path, registry_path: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);
    check_registry(registry_path, &mut checks, &mut all_pass);

    let layout = WorkspaceLayout::new(workspace);
    if layout.control_dir().exists() {
        checks.push(Check::pass("workspace_exists", "Workspace control directory exists"));
        check_workspace(&layout, &mut checks, &mut all_pass);
        check_disk_space(workspace, &mut checks);
    } else {
        checks.push(Check::info(
            "workspace_exists",
            "Workspace not initialized (will be created on first reconcile)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = devstack_runtime::check_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("tool_prereqs", "git, docker, and docker compose found"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "tool_prereqs",
            &format!(
                "Missing prerequisites: {}",
                devstack_runtime::format_missing(&missing)
            ),
        ));
    }
}

fn check_registry(path: &Path, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match devstack_schema::load_registry(path) {
        Ok(registry) => checks.push(Check::pass(
            "registry",
            &format!(
                "Registry {} is valid ({} services)",
                path.display(),
                registry.services().len()
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "registry",
                &format!("Registry {} is invalid: {e}", path.display()),
            ));
        }
    }
}

fn check_workspace(layout: &WorkspaceLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("state_version", "State format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_version",
                &format!("State version check failed: {e}"),
            ));
        }
    }

    let store = FileStateStore::new(layout.clone());
    match store.load_with_errors() {
        Ok(records) => {
            let corrupt: Vec<&(String, _)> = records.iter().filter_map(|r| r.as_ref().err()).collect();
            if corrupt.is_empty() {
                checks.push(Check::pass(
                    "state_integrity",
                    &format!("State records OK ({} checked)", records.len()),
                ));
            } else {
                *all_pass = false;
                let names: Vec<&str> = corrupt.iter().map(|(name, _)| name.as_str()).collect();
                checks.push(Check::fail(
                    "state_integrity",
                    &format!(
                        "{} of {} state records unreadable: {}",
                        corrupt.len(),
                        records.len(),
                        names.join(", ")
                    ),
                ));
            }
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_integrity",
                &format!("Cannot read state directory: {e}"),
            ));
        }
    }

    match WorkspaceLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("workspace_lock", "Workspace lock is free")),
        Ok(None) => checks.push(Check::warn(
            "workspace_lock",
            "Workspace lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "workspace_lock",
                &format!("Cannot check workspace lock: {e}"),
            ));
        }
    }

    if layout.compose_file().exists() {
        checks.push(Check::info("manifest", "docker-compose.yml present"));
    } else {
        checks.push(Check::info("manifest", "No docker-compose.yml generated yet"));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("devstack doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn new(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

fn check_disk_space(workspace: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(workspace.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: valid NUL-terminated path and a zeroed output struct that is
    // only read after the call succeeds.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    #[allow(clippy::unnecessary_cast)]
    let avail_mb = (stat.f_bavail as u64 * stat.f_frsize as u64) / (1024 * 1024);

    // Image builds for every service need room; warn well before it runs out.
    if avail_mb < 1024 {
        checks.push(Check::fail(
            "disk_space",
            &format!("Low disk space: {avail_mb} MB available"),
        ));
    } else if avail_mb < 10 * 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Disk space: {avail_mb} MB available (image builds may exhaust it)"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space: {} GB available", avail_mb / 1024),
        ));
    }
}
