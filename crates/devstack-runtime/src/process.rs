use crate::RuntimeError;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Render a command line for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, RuntimeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run `cmd` to completion, capturing stdout and stderr, and kill it if it
/// outlives `timeout`.
///
/// A non-zero exit is not an error here; callers classify it. Spawn failures
/// surface as [`RuntimeError::ToolMissing`] when the program does not exist.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, RuntimeError> {
    let line = describe(cmd);
    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::debug!("running: {line}");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::ToolMissing(program)
            } else {
                RuntimeError::Io(e)
            }
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = wait_deadline(&mut child, timeout)? else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(RuntimeError::Timeout {
            command: line,
            secs: timeout.as_secs(),
        });
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

/// Like [`run_with_timeout`], but a non-zero exit becomes
/// [`RuntimeError::CommandFailed`] carrying the tail of stderr.
pub fn run_checked(cmd: &mut Command, timeout: Duration) -> Result<Output, RuntimeError> {
    let output = run_with_timeout(cmd, timeout)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(RuntimeError::CommandFailed {
            command: describe(cmd),
            code: output.status.code(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), 20),
        })
    }
}

/// Last `lines` lines of `text`, trimmed.
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = run_with_timeout(
            Command::new("sh").args(["-c", "echo hello"]),
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_not_an_error() {
        let out = run_with_timeout(
            Command::new("sh").args(["-c", "exit 3"]),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn run_checked_reports_stderr() {
        let err = run_checked(
            Command::new("sh").args(["-c", "echo boom >&2; exit 1"]),
            Duration::from_secs(10),
        )
        .unwrap_err();
        match err {
            RuntimeError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let start = Instant::now();
        let err = run_with_timeout(
            Command::new("sh").args(["-c", "sleep 5"]),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_tool_missing() {
        let err = run_with_timeout(
            &mut Command::new("devstack-definitely-not-a-tool"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::ToolMissing(_)));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 3), "");
    }

    #[test]
    fn describe_joins_args() {
        let mut cmd = Command::new("git");
        cmd.args(["pull", "--ff-only"]);
        assert_eq!(describe(&cmd), "git pull --ff-only");
    }
}
