use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ogent_shared::{AgentEvent, CommandResult, ControllerEvent, ExecutionTarget, ExecutionType, ProgressStatus};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::communication::client::{fetch_bearer_token, Client, EventSender};
use crate::executor::{Executor, ExecutorOutcome, LocalExecutor, ProgressUpdate, RemoteShellExecutor};
use crate::utils::config::Config;

/// A dispatched command waiting for (or running on) a worker, carrying its
/// own cancellation signal so a `cancel_command` arriving while the job is
/// still queued is honored the moment a worker picks it up.
struct Job {
    command_id: Uuid,
    command: String,
    execution_target: ExecutionTarget,
    cancel_rx: watch::Receiver<bool>,
}

/// Client side of the event protocol: authenticates, maintains
/// the persistent connection with bounded-backoff reconnect, and runs a
/// fixed pool of workers that pull dispatched commands off an internal
/// queue and drive them through the Executor abstraction.
pub struct AgentCore {
    config: Config,
    local_executor: Arc<LocalExecutor>,
    remote_executor: Option<Arc<RemoteShellExecutor>>,
    cancel_senders: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

/// Why the agent stopped running its connection loop, so `main` can choose
/// an exit code — on permanent failure the agent terminates with a
/// distinguishable status.
pub enum ShutdownReason {
    Requested,
    ReconnectAttemptsExhausted,
}

impl AgentCore {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let remote_executor = if config.remote.enabled {
            Some(Arc::new(RemoteShellExecutor::from_config(&config.remote)?))
        } else {
            None
        };

        Ok(Self {
            config,
            local_executor: Arc::new(LocalExecutor::new()),
            remote_executor,
            cancel_senders: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Runs until a shutdown is requested via `shutdown_rx` or reconnection
    /// is permanently exhausted. Each connection attempt authenticates,
    /// opens the WebSocket, registers, spawns a fresh worker pool, and
    /// drains controller events until the socket drops.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<ShutdownReason> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                return Ok(ShutdownReason::Requested);
            }

            match self.connect_and_serve(&mut shutdown_rx).await {
                Ok(ConnectionOutcome::ShutdownRequested) => return Ok(ShutdownReason::Requested),
                Ok(ConnectionOutcome::Disconnected) => {
                    attempt = 0; // a session that registered and later dropped resets backoff
                }
                Err(e) => {
                    warn!(error = %e, attempt, "connection attempt failed");
                    attempt += 1;
                    if self.config.max_reconnect_attempts > 0
                        && attempt >= self.config.max_reconnect_attempts
                    {
                        error!("exhausted {} reconnect attempts, giving up", attempt);
                        return Ok(ShutdownReason::ReconnectAttemptsExhausted);
                    }
                }
            }

            let delay = self.backoff_delay(attempt);
            info!(?delay, attempt, "reconnecting to controller");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(ShutdownReason::Requested);
                    }
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_delay_secs.max(1);
        let capped_exponent = attempt.min(6); // base * 2^6 is already a generous ceiling
        let secs = base.saturating_mul(1u64 << capped_exponent);
        Duration::from_secs(secs.min(300))
    }

    async fn connect_and_serve(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<ConnectionOutcome> {
        let token = fetch_bearer_token(
            &self.config.controller_url,
            &self.config.username,
            &self.config.password,
        )
        .await?;

        let mut client = Client::connect(&self.config.controller_url, &token).await?;
        let sender = client.sender();

        sender.send(&AgentEvent::Register {
            agent_id: self.config.agent_id_override.clone(),
            info: self.capability_info(),
        })?;

        let assigned_agent_id = match client.recv_event().await {
            Some(ControllerEvent::RegisterAck { assigned_agent_id, status }) => match status {
                ogent_shared::RegisterAckStatus::Ok => assigned_agent_id,
                ogent_shared::RegisterAckStatus::Rejected { reason } => {
                    anyhow::bail!("registration rejected by controller: {reason}");
                }
            },
            Some(_) => anyhow::bail!("expected register_ack as the first controller event"),
            None => anyhow::bail!("connection closed before register_ack"),
        };
        info!(agent_id = %assigned_agent_id, "registered with controller");

        let (job_tx, job_rx) = mpsc::channel::<Job>(64);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let concurrency = self.config.concurrency_limit.max(1);
        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let job_rx = Arc::clone(&job_rx);
            let local_executor = Arc::clone(&self.local_executor);
            let remote_executor = self.remote_executor.clone();
            let sender = sender.clone();
            workers.push(tokio::spawn(async move {
                run_worker(worker_id, job_rx, local_executor, remote_executor, sender).await;
            }));
        }

        let outcome = self
            .drain_controller_events(&mut client, &job_tx, shutdown_rx)
            .await;

        drop(job_tx);
        for worker in workers {
            let _ = worker.await;
        }
        client.close().await;
        self.cancel_senders.lock().await.clear();

        outcome
    }

    async fn drain_controller_events(
        &self,
        client: &mut Client,
        job_tx: &mpsc::Sender<Job>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<ConnectionOutcome> {
        loop {
            tokio::select! {
                event = client.recv_event() => {
                    match event {
                        Some(ControllerEvent::ExecuteCommand { command_id, command, execution_target, .. }) => {
                            self.enqueue(job_tx, command_id, command, execution_target).await;
                        }
                        Some(ControllerEvent::CancelCommand { command_id }) => {
                            self.cancel(command_id).await;
                        }
                        Some(ControllerEvent::AgentInfo { info }) => {
                            debug!(?info, "received capability update from controller");
                        }
                        Some(ControllerEvent::RegisterAck { .. }) => {
                            warn!("unexpected duplicate register_ack on an already-registered session");
                        }
                        None => return Ok(ConnectionOutcome::Disconnected),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(ConnectionOutcome::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Registers the command's cancellation channel before it is queued, so
    /// a `cancel_command` that arrives while the job is still waiting for a
    /// free worker still reaches it.
    async fn enqueue(
        &self,
        job_tx: &mpsc::Sender<Job>,
        command_id: Uuid,
        command: String,
        execution_target: ExecutionTarget,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel_senders.lock().await.insert(command_id, cancel_tx);

        let job = Job {
            command_id,
            command,
            execution_target,
            cancel_rx,
        };

        let job_tx = job_tx.clone();
        let cancel_senders = Arc::clone(&self.cancel_senders);
        tokio::spawn(async move {
            if job_tx.send(job).await.is_err() {
                cancel_senders.lock().await.remove(&command_id);
                warn!(%command_id, "dropped dispatch: worker queue is closed");
            }
        });
    }

    async fn cancel(&self, command_id: Uuid) {
        if let Some(sender) = self.cancel_senders.lock().await.get(&command_id) {
            let _ = sender.send(true);
            debug!(%command_id, "cancellation requested");
        } else {
            debug!(%command_id, "cancel_command for unknown or already-finished command");
        }
    }

    fn capability_info(&self) -> serde_json::Value {
        let mut executors = vec!["local"];
        if self.remote_executor.is_some() {
            executors.push("remote");
        }

        serde_json::json!({
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "version": env!("CARGO_PKG_VERSION"),
            "executors": executors,
            "concurrency_limit": self.config.concurrency_limit,
            "remote_target": self.remote_target_descriptor(),
        })
    }

    fn remote_target_descriptor(&self) -> Option<String> {
        let remote = &self.config.remote;
        remote.host.as_ref().map(|host| {
            format!(
                "{}@{}:{}",
                remote.username.as_deref().unwrap_or("?"),
                host,
                remote.port
            )
        })
    }
}

enum ConnectionOutcome {
    Disconnected,
    ShutdownRequested,
}

/// One worker's loop: pull the next job off the shared queue, run it to
/// completion (or cancellation), report exactly one `command_result`, then
/// go back for the next job. Multiple workers share `job_rx` to get a
/// multi-consumer queue out of an `mpsc::Receiver`, which only exposes a
/// `&mut self` `recv`.
async fn run_worker(
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    local_executor: Arc<LocalExecutor>,
    remote_executor: Option<Arc<RemoteShellExecutor>>,
    sender: EventSender,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker_id, "job queue closed, worker exiting");
            return;
        };

        run_job(job, &local_executor, remote_executor.as_deref(), &sender).await;
    }
}

async fn run_job(
    job: Job,
    local_executor: &LocalExecutor,
    remote_executor: Option<&RemoteShellExecutor>,
    sender: &EventSender,
) {
    let Job {
        command_id,
        command,
        execution_target,
        cancel_rx,
    } = job;

    if *cancel_rx.borrow() {
        send_result(
            sender,
            command_id,
            ExecutionType::Local,
            None,
            Ok(ExecutorOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: "cancelled before execution started".to_string(),
                cancelled: true,
            }),
        );
        return;
    }

    match execution_target {
        ExecutionTarget::Local => {
            let outcome = run_with_progress(local_executor, command_id, &command, cancel_rx, sender).await;
            send_result(sender, command_id, ExecutionType::Local, None, outcome);
        }
        ExecutionTarget::Remote => match remote_executor {
            Some(remote) => {
                let target = Some(remote.target_descriptor());
                let outcome = run_with_progress(remote, command_id, &command, cancel_rx, sender).await;
                send_result(sender, command_id, ExecutionType::Remote, target, outcome);
            }
            None => {
                send_result(
                    sender,
                    command_id,
                    ExecutionType::Remote,
                    None,
                    Err(anyhow::anyhow!(
                        "remote execution was requested but no remote target is configured"
                    )),
                );
            }
        },
        ExecutionTarget::Auto => match remote_executor {
            Some(remote) if remote.available() => {
                let target = Some(remote.target_descriptor());
                let outcome = run_with_progress(remote, command_id, &command, cancel_rx, sender).await;
                send_result(sender, command_id, ExecutionType::Remote, target, outcome);
            }
            _ => {
                let outcome = run_with_progress(local_executor, command_id, &command, cancel_rx, sender).await;
                send_result(sender, command_id, ExecutionType::Local, None, outcome);
            }
        },
    }
}

/// Drives one executor's `run` to completion while forwarding every
/// `ProgressUpdate` it produces as a `command_progress` frame, in the
/// order it arrives.
async fn run_with_progress(
    executor: &(impl Executor + ?Sized),
    command_id: Uuid,
    command: &str,
    cancel_rx: watch::Receiver<bool>,
    sender: &EventSender,
) -> anyhow::Result<ExecutorOutcome> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();

    let run_fut = executor.run(command, progress_tx, cancel_rx);
    tokio::pin!(run_fut);

    loop {
        tokio::select! {
            biased;
            Some(update) = progress_rx.recv() => {
                send_progress(sender, command_id, &update);
            }
            outcome = &mut run_fut => {
                while let Ok(update) = progress_rx.try_recv() {
                    send_progress(sender, command_id, &update);
                }
                return outcome;
            }
        }
    }
}

fn send_result(
    sender: &EventSender,
    command_id: Uuid,
    execution_type: ExecutionType,
    target_descriptor: Option<String>,
    outcome: anyhow::Result<ExecutorOutcome>,
) {
    let result = match outcome {
        Ok(outcome) => CommandResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            execution_type,
            target_descriptor,
            cancelled: outcome.cancelled,
        },
        Err(e) => {
            error!(%command_id, error = %e, "executor failed");
            CommandResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("executor error: {e}"),
                execution_type,
                target_descriptor,
                cancelled: false,
            }
        }
    };

    let event = AgentEvent::CommandResult {
        command_id,
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
        execution_type: result.execution_type,
        target_descriptor: result.target_descriptor,
        cancelled: result.cancelled,
        ts: Utc::now(),
    };
    if let Err(e) = sender.send(&event) {
        error!(%command_id, error = %e, "failed to send command_result");
    }
}

fn send_progress(sender: &EventSender, command_id: Uuid, update: &ProgressUpdate) {
    let event = AgentEvent::CommandProgress {
        command_id,
        status: ProgressStatus::Running,
        progress: None,
        stdout_chunk: update.stdout_chunk.clone(),
        stderr_chunk: update.stderr_chunk.clone(),
        message: None,
        ts: Utc::now(),
    };
    if let Err(e) = sender.send(&event) {
        warn!(%command_id, error = %e, "failed to send command_progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;

    fn test_config() -> Config {
        Config {
            controller_url: "ws://localhost:3000/ws/agent".to_string(),
            username: "admin".to_string(),
            password: "change-me".to_string(),
            agent_id_override: None,
            reconnect_delay_secs: 1,
            max_reconnect_attempts: 3,
            concurrency_limit: 2,
            remote: crate::utils::config::RemoteConfig::default(),
        }
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        let core = AgentCore::new(test_config()).unwrap();
        assert_eq!(core.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(core.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(core.backoff_delay(10), Duration::from_secs(300));
    }

    #[test]
    fn capability_info_lists_local_only_without_remote_config() {
        let core = AgentCore::new(test_config()).unwrap();
        let info = core.capability_info();
        assert_eq!(info["executors"], serde_json::json!(["local"]));
    }

    #[tokio::test]
    async fn cancel_on_unknown_command_is_a_no_op() {
        let core = AgentCore::new(test_config()).unwrap();
        core.cancel(Uuid::new_v4()).await; // must not panic
    }

    #[tokio::test]
    async fn run_job_forwards_progress_in_order() {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let executor = LocalExecutor::new();

        let handle = tokio::spawn(async move {
            executor
                .run("printf 'a\\nb\\n'", progress_tx, cancel_rx)
                .await
        });

        let mut chunks = Vec::new();
        while let Some(update) = progress_rx.recv().await {
            if let Some(chunk) = update.stdout_chunk {
                chunks.push(chunk);
            }
        }

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(chunks, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(outcome.exit_code, 0);
    }
}
