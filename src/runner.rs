#![forbid(unsafe_code)]

//! Timeout-bounded subprocess execution.
//!
//! `run` launches an external executable, captures its output and enforces a
//! hard wall-clock deadline. Every invocation resolves exactly once: the
//! deadline winning the race drops the capture future, so a close event that
//! arrives after the kill can never overwrite the timeout outcome.

use std::{ffi::OsStr, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time::timeout,
};

/// Terminal outcomes of a failed invocation. Success carries the captured
/// stdout instead, so output and failure are mutually exclusive.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The executable could not be spawned at all (missing binary,
    /// permission denied, ...).
    #[error("failed to launch {command}: {message}")]
    Launch { command: String, message: String },

    /// The wall-clock deadline fired before the child exited. The child has
    /// been killed and reaped by the time this is returned.
    #[error("{command} timed out after {}ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    /// The child exited with a non-zero status. Carries stderr when the
    /// child produced any, otherwise a message naming the exit code.
    #[error("{message}")]
    Process { message: String },
}

/// Runs `executable` with `args` and returns its stdout on a clean exit.
///
/// Arguments are passed as a discrete list, never through a shell, so
/// callers can forward untrusted strings without quoting concerns. stderr is
/// captured alongside stdout; a zero exit status succeeds even when stderr
/// is non-empty (yt-dlp routinely warns there).
pub async fn run<I, S>(
    executable: &str,
    args: I,
    deadline: Duration,
) -> Result<String, RunnerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| RunnerError::Launch {
            command: executable.to_string(),
            message: err.to_string(),
        })?;

    let outcome = timeout(deadline, capture(&mut child)).await;
    match outcome {
        Ok(Ok((status, stdout, stderr))) => {
            if status.success() {
                Ok(String::from_utf8_lossy(&stdout).into_owned())
            } else {
                let stderr = String::from_utf8_lossy(&stderr);
                let message = if stderr.trim().is_empty() {
                    match status.code() {
                        Some(code) => format!("{executable} exited with code {code}"),
                        None => format!("{executable} was terminated by a signal"),
                    }
                } else {
                    stderr.trim().to_string()
                };
                Err(RunnerError::Process { message })
            }
        }
        Ok(Err(err)) => Err(RunnerError::Process {
            message: format!("waiting for {executable}: {err}"),
        }),
        Err(_) => {
            // Deadline fired first. The capture future is already dropped, so
            // nothing else can resolve this invocation; kill() also reaps.
            let _ = child.kill().await;
            Err(RunnerError::Timeout {
                command: executable.to_string(),
                timeout: deadline,
            })
        }
    }
}

/// Drains stdout and stderr concurrently while waiting for the exit status.
/// Draining both pipes before `wait` keeps a chatty child from filling a
/// pipe buffer and deadlocking against its own exit.
async fn capture(
    child: &mut Child,
) -> std::io::Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let (stdout, stderr) = tokio::join!(drain(stdout_pipe), drain(stderr_pipe));
    let status = child.wait().await?;
    Ok((status, stdout, stderr))
}

async fn drain(pipe: Option<impl AsyncRead + Unpin>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        // A read error mid-stream leaves us with whatever arrived so far,
        // which mirrors incremental accumulation.
        let _ = pipe.read_to_end(&mut buffer).await;
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const GENEROUS: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn clean_exit_returns_stdout_even_with_noisy_stderr() {
        let output = run("sh", ["-c", "echo warning >&2; echo hello"], GENEROUS)
            .await
            .unwrap();
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let err = run("sh", ["-c", "echo boom >&2; exit 1"], GENEROUS)
            .await
            .unwrap_err();
        match err {
            RunnerError::Process { message } => assert_eq!(message, "boom"),
            other => panic!("expected Process, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_without_stderr_names_the_code() {
        let err = run("sh", ["-c", "exit 7"], GENEROUS).await.unwrap_err();
        match err {
            RunnerError::Process { message } => {
                assert!(message.contains("code 7"), "message was: {message}")
            }
            other => panic!("expected Process, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_process_times_out_and_is_killed() {
        let start = Instant::now();
        let err = run("sleep", ["30"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }), "got {err:?}");
        // run() only returns after kill() has reaped the child, so getting
        // here quickly means the process is gone.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_wins_over_output_produced_before_the_deadline() {
        // The child prints immediately and then outlives the deadline; the
        // settled outcome must still be Timeout, not the captured output.
        let err = run("sh", ["-c", "echo early; sleep 30"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let err = run("vidgate-test-no-such-binary", ["--version"], GENEROUS)
            .await
            .unwrap_err();
        match err {
            RunnerError::Launch { command, .. } => {
                assert_eq!(command, "vidgate-test-no-such-binary")
            }
            other => panic!("expected Launch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        // If an argument went through a shell this would echo an empty
        // expansion instead of the literal text.
        let output = run("echo", ["$HOME; rm -rf /"], GENEROUS).await.unwrap();
        assert_eq!(output.trim(), "$HOME; rm -rf /");
    }
}
