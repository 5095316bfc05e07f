use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn runs_ok(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the external tools a reconciliation pass needs.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !runs_ok("git", &["--version"]) {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "cloning and updating service repositories",
            install_hint: "zypper install git | apt install git | dnf install git | pacman -S git",
        });
    }

    if !runs_ok("docker", &["--version"]) {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "building service images",
            install_hint: "see https://docs.docker.com/engine/install/",
        });
    } else if !runs_ok("docker", &["compose", "version"]) {
        missing.push(MissingPrereq {
            name: "docker compose",
            purpose: "running the generated stack",
            install_hint:
                "install the compose plugin: apt install docker-compose-plugin | dnf install docker-compose-plugin",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ndevstack needs these tools to acquire and build services.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "git",
            purpose: "cloning repositories",
            install_hint: "apt install git",
        };
        let s = format!("{m}");
        assert!(s.contains("git"));
        assert!(s.contains("cloning repositories"));
        assert!(s.contains("apt install git"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "git",
                purpose: "clones",
                install_hint: "apt install git",
            },
            MissingPrereq {
                name: "docker compose",
                purpose: "stack",
                install_hint: "apt install docker-compose-plugin",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("git"));
        assert!(output.contains("docker compose"));
    }
}
