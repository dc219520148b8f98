//! Executor abstraction: runs a command either on the local
//! host or over a managed outbound remote-shell connection, streaming
//! incremental output and honoring a cooperative cancellation signal.

pub mod local;
pub mod remote;

pub use local::LocalExecutor;
pub use remote::RemoteShellExecutor;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// A chunk of output produced while a command is still running.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stdout_chunk: Option<String>,
    pub stderr_chunk: Option<String>,
}

/// The terminal outcome of running a command to completion (or cancellation).
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub cancelled: bool,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Whether this executor can run a command right now.
    /// Cheap and non-blocking: for `RemoteShellExecutor` it reflects
    /// whether a target is configured, not live reachability — connection
    /// failures surface from `run` itself instead.
    fn available(&self) -> bool;

    /// Runs `command` to completion, sending a `ProgressUpdate` on
    /// `progress_tx` for each line of output produced. `cancel_rx` carries
    /// `true` once cancellation has been requested; the implementation is
    /// expected to tear the command down within a bounded time of that.
    async fn run(
        &self,
        command: &str,
        progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
        cancel_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<ExecutorOutcome>;
}
