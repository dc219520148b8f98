use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use super::{Executor, ExecutorOutcome, ProgressUpdate};

/// Runs commands as a child process on the agent's own host via a shell,
/// streaming stdout/stderr line by line and killing the child's whole
/// process group on cancellation so shell pipelines don't leave orphans
/// behind.
#[derive(Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn available(&self) -> bool {
        true
    }

    async fn run(
        &self,
        command: &str,
        progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<ExecutorOutcome> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut cancelled = false;
        let mut stdout_done = false;
        let mut stderr_done = false;

        loop {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line? {
                        Some(chunk) => {
                            stdout_buf.push_str(&chunk);
                            stdout_buf.push('\n');
                            let _ = progress_tx.send(ProgressUpdate {
                                stdout_chunk: Some(chunk),
                                stderr_chunk: None,
                            });
                        }
                        None => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line? {
                        Some(chunk) => {
                            stderr_buf.push_str(&chunk);
                            stderr_buf.push('\n');
                            let _ = progress_tx.send(ProgressUpdate {
                                stdout_chunk: None,
                                stderr_chunk: Some(chunk),
                            });
                        }
                        None => stderr_done = true,
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    return Ok(ExecutorOutcome {
                        exit_code: status.code().unwrap_or(-1),
                        stdout: stdout_buf,
                        stderr: stderr_buf,
                        cancelled,
                    });
                }
                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow() && !cancelled {
                        cancelled = true;
                        kill_process_group(&child);
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &tokio::process::Child) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command_and_captures_output() {
        let executor = LocalExecutor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { executor.run("echo hello", tx, cancel_rx).await });

        let mut chunks = Vec::new();
        while let Some(update) = rx.recv().await {
            if let Some(chunk) = update.stdout_chunk {
                chunks.push(chunk);
            }
        }

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("hello"));
        assert!(!outcome.cancelled);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let executor = LocalExecutor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let outcome = executor.run("exit 7", tx, cancel_rx).await.unwrap();
        assert_eq!(outcome.exit_code, 7);
    }

    #[tokio::test]
    async fn cancellation_terminates_long_running_command() {
        let executor = LocalExecutor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { executor.run("sleep 30", tx, cancel_rx).await });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("executor did not react to cancellation in time")
            .unwrap()
            .unwrap();
        assert!(outcome.cancelled);
        assert_ne!(outcome.exit_code, 0);
    }
}
