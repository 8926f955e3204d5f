use std::process::Stdio;
use tokio::process::Command;

const STDERR_TAIL_BYTES: usize = 512;

/// Result of one command execution. Launch failures are folded in here too,
/// so running a command never returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub succeeded: bool,
    /// Process exit code; -1 when killed by a signal or never launched.
    pub exit_code: i32,
    pub error: Option<String>,
}

impl ExecOutcome {
    fn success() -> Self {
        Self {
            succeeded: true,
            exit_code: 0,
            error: None,
        }
    }

    fn failure(exit_code: i32, error: String) -> Self {
        Self {
            succeeded: false,
            exit_code,
            error: Some(error),
        }
    }
}

/// Runs job commands through a shell, `sh -c <command>` by default.
/// Stdout is discarded; stderr is captured for the failure message.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::with_shell("sh")
    }
}

impl ShellExecutor {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub async fn run(&self, command: &str) -> ExecOutcome {
        let spawned = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return ExecOutcome::failure(-1, format!("failed to launch {}: {e}", self.shell))
            }
        };

        match child.wait_with_output().await {
            Ok(out) if out.status.success() => ExecOutcome::success(),
            Ok(out) => {
                let code = out.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let tail = tail(stderr.trim(), STDERR_TAIL_BYTES);
                let error = if tail.is_empty() {
                    format!("command exited with code {code}")
                } else {
                    format!("command exited with code {code}: {tail}")
                };
                ExecOutcome::failure(code, error)
            }
            Err(e) => ExecOutcome::failure(-1, format!("failed to wait for {}: {e}", self.shell)),
        }
    }
}

fn tail(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
