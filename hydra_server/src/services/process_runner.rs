//! Executes one external command and reports how it ended.
//!
//! The runner is stateless: the working directory is always passed in,
//! never taken from (or written to) the process-wide cwd.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::CommandError;

/// Keep at most this much stderr in errors and logs.
const STDERR_TAIL_BYTES: usize = 4096;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` in `cwd`; success means exit status 0.
    async fn run(&self, argv: &[String], cwd: &Path) -> Result<(), CommandError>;
}

/// Runs commands as child processes of this service.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String], cwd: &Path) -> Result<(), CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
        let command = argv.join(" ");

        tracing::info!(command = %command, cwd = %cwd.display(), "Running command");
        let start = Instant::now();

        let result = tokio::time::timeout(self.timeout, async {
            Command::new(program)
                .args(args)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await;

        crate::metrics::command_duration(program, start.elapsed().as_millis() as u64);

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                tracing::error!(command = %command, "Failed to launch command: {source}");
                return Err(CommandError::Launch { command, source });
            }
            Err(_) => {
                tracing::error!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(CommandError::TimedOut {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if output.status.success() {
            tracing::debug!(
                command = %command,
                duration_ms = start.elapsed().as_millis() as u64,
                "Command succeeded"
            );
            return Ok(());
        }

        let stderr = tail(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code();
        tracing::warn!(command = %command, ?exit_code, "Command failed: {stderr}");
        Err(CommandError::Exited {
            command,
            exit_code,
            stderr,
        })
    }
}

fn tail(text: &str) -> String {
    let text = text.trim_end();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...truncated...\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        runner().run(&argv(&["true"]), dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner()
            .run(&argv(&["sh", "-c", "echo boom >&2; exit 3"]), dir.path())
            .await
            .unwrap_err();
        match err {
            CommandError::Exited {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner()
            .run(&argv(&["hydra-no-such-program"]), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));
    }

    #[tokio::test]
    async fn runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        runner()
            .run(&argv(&["sh", "-c", "touch marker"]), dir.path())
            .await
            .unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessRunner::new(Duration::from_millis(100))
            .run(&argv(&["sleep", "5"]), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner().run(&[], dir.path()).await.unwrap_err();
        assert!(matches!(err, CommandError::Empty));
    }

    #[tokio::test]
    async fn large_stdout_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        runner()
            .run(
                &argv(&["sh", "-c", "head -c 8000000 /dev/zero; echo done >&2"]),
                dir.path(),
            )
            .await
            .unwrap();
    }

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 10) + "END";
        let t = tail(&long);
        assert!(t.starts_with("...truncated..."));
        assert!(t.ends_with("END"));
    }
}
