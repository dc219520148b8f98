use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tokio::sync::{mpsc, watch};

use super::{Executor, ExecutorOutcome, ProgressUpdate};
use crate::utils::config::RemoteConfig;

/// Runs commands over an outbound SSH connection to a fixed remote host,
/// used when `execution_target` is `remote` (or `auto` on an agent
/// configured with a remote target). ssh2's API is synchronous, so the
/// session lives entirely on a blocking thread; cancellation is relayed
/// to that thread via a shared flag rather than through Tokio's async
/// cancellation machinery.
#[derive(Clone)]
pub struct RemoteShellExecutor {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    key_path: Option<std::path::PathBuf>,
    timeout: Duration,
}

impl RemoteShellExecutor {
    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("remote execution target has no host configured"))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| anyhow::anyhow!("remote execution target has no username configured"))?;

        Ok(Self {
            host,
            port: config.port,
            username,
            password: config.password.clone(),
            key_path: config.key_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Human-readable target descriptor attached to command results
    /// on a command result.
    pub fn target_descriptor(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    fn run_blocking(
        &self,
        command: &str,
        progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
        cancel_flag: Arc<AtomicBool>,
    ) -> anyhow::Result<ExecutorOutcome> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        tcp.set_read_timeout(Some(self.timeout))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        if let Some(key_path) = &self.key_path {
            session.userauth_pubkey_file(&self.username, None, key_path, None)?;
        } else if let Some(password) = &self.password {
            session.userauth_password(&self.username, password)?;
        } else {
            anyhow::bail!("remote executor has neither a key_path nor a password configured");
        }

        if !session.authenticated() {
            anyhow::bail!("ssh authentication to {} failed", self.host);
        }

        let mut channel = session.channel_session()?;
        channel.exec(command)?;
        session.set_blocking(false);

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel_flag.load(Ordering::Relaxed) {
                cancelled = true;
                let _ = channel.close();
            }

            let mut made_progress = false;
            let mut chunk = [0u8; 4096];

            match channel.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    made_progress = true;
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    stdout_buf.push_str(&text);
                    let _ = progress_tx.send(ProgressUpdate {
                        stdout_chunk: Some(text),
                        stderr_chunk: None,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            match channel.stderr().read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    made_progress = true;
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    stderr_buf.push_str(&text);
                    let _ = progress_tx.send(ProgressUpdate {
                        stdout_chunk: None,
                        stderr_chunk: Some(text),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if channel.eof() {
                break;
            }

            if !made_progress {
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        let _ = channel.wait_close();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(ExecutorOutcome {
            exit_code,
            stdout: stdout_buf,
            stderr: stderr_buf,
            cancelled,
        })
    }
}

#[async_trait]
impl Executor for RemoteShellExecutor {
    fn available(&self) -> bool {
        true
    }

    async fn run(
        &self,
        command: &str,
        progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<ExecutorOutcome> {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let watcher_flag = Arc::clone(&cancel_flag);
        let watcher = tokio::spawn(async move {
            if cancel_rx.changed().await.is_ok() && *cancel_rx.borrow() {
                watcher_flag.store(true, Ordering::Relaxed);
            }
        });

        let this = self.clone();
        let command = command.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            this.run_blocking(&command, progress_tx, cancel_flag)
        })
        .await??;

        watcher.abort();
        Ok(outcome)
    }
}
