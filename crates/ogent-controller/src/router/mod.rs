use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use ogent_shared::{
    AgentEvent, AiAnalysis, AnalyzeRequest, Command, CommandResult, CommandStatus,
    ControllerEvent, ExecuteCommandRequest, ExecutionTarget, OgentError, Result,
};

use crate::ai::AiStage;
use crate::fanout::Fanout;
use crate::registry::{AgentRegistry, CommandRegistry};

/// Owns the command state machine: accepts submissions, applies the AI
/// pre-processing stage, dispatches to the agent's channel, advances state
/// on progress/result events, and enforces per-command deadlines and the
/// post-disconnect grace interval.
pub struct CommandRouter {
    agent_registry: Arc<AgentRegistry>,
    command_registry: Arc<CommandRegistry>,
    fanout: Arc<dyn Fanout>,
    ai_stage: Arc<dyn AiStage>,
    deadline_default: Duration,
    grace_interval: Duration,
}

impl CommandRouter {
    pub fn new(
        agent_registry: Arc<AgentRegistry>,
        command_registry: Arc<CommandRegistry>,
        fanout: Arc<dyn Fanout>,
        ai_stage: Arc<dyn AiStage>,
        deadline_default: Duration,
        grace_interval: Duration,
    ) -> Self {
        Self {
            agent_registry,
            command_registry,
            fanout,
            ai_stage,
            deadline_default,
            grace_interval,
        }
    }

    /// Pure analysis, standalone from dispatch (`/agents/{id}/analyze`).
    pub fn analyze(&self, request: &AnalyzeRequest) -> AiAnalysis {
        self.ai_stage.process(&request.command, None, None)
    }

    /// Validates the target agent, applies the AI stage when requested, and
    /// dispatches over the fan-out adapter. A command whose dispatch fails
    /// is still returned — as a `Failed` command the requester can observe
    /// — rather than as an HTTP-level error, treating non-delivery as a
    /// terminal command outcome.
    pub async fn submit_command(
        self: &Arc<Self>,
        agent_id: &str,
        requester_id: &str,
        request: ExecuteCommandRequest,
    ) -> Result<Command> {
        if self.agent_registry.get(agent_id).await.is_none() {
            return Err(OgentError::AgentNotFound(agent_id.to_string()));
        }

        let execution_target = request.execution_target.unwrap_or(ExecutionTarget::Auto);
        let command_id = Uuid::new_v4();

        let processed_command_text = if request.use_ai {
            let analysis = self.ai_stage.process(
                &request.command,
                request.system.as_deref(),
                request.context.as_ref(),
            );

            if !analysis.validation.safe {
                return Err(OgentError::InvalidInput(analysis.validation.reason.unwrap_or_else(
                    || "command flagged unsafe by the AI pre-processing stage".to_string(),
                )));
            }

            Some(analysis.processed_command)
        } else {
            None
        };

        let command = Command {
            command_id,
            agent_id: agent_id.to_string(),
            requester_id: requester_id.to_string(),
            command_text: request.command,
            processed_command_text,
            execution_target,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            dispatched_at: None,
            first_progress_at: None,
            terminal_at: None,
            result: None,
            failure_reason: None,
            late_frames: 0,
        };

        self.command_registry.insert(command.clone()).await;

        let event = ControllerEvent::ExecuteCommand {
            command_id,
            command: command.effective_text().to_string(),
            execution_target,
            requester_id: requester_id.to_string(),
        };

        match self.fanout.send_to_agent(agent_id, &event).await {
            Ok(()) => {
                let dispatched = self
                    .command_registry
                    .update(command_id, |c| {
                        c.status = CommandStatus::Dispatched;
                        c.dispatched_at = Some(Utc::now());
                    })
                    .await
                    .expect("command was just inserted");

                let router = Arc::clone(self);
                tokio::spawn(async move { router.run_deadline_timer(command_id).await });

                Ok(dispatched)
            }
            Err(e) => {
                warn!(agent_id, %command_id, error = %e, "command not deliverable");
                let failed = self
                    .command_registry
                    .update(command_id, |c| {
                        c.status = CommandStatus::Failed;
                        c.terminal_at = Some(Utc::now());
                        c.failure_reason = Some(e.to_string());
                    })
                    .await
                    .expect("command was just inserted");
                self.command_registry.mark_terminal(command_id).await;
                Ok(failed)
            }
        }
    }

    /// Requests cancellation of a dispatched or running command. A command
    /// still `Pending` (never dispatched) is failed immediately; otherwise
    /// a `cancel_command` event is forwarded and the terminal transition
    /// happens when the agent's result (or the deadline) arrives.
    pub async fn cancel_command(&self, command_id: Uuid) -> Result<()> {
        let command = self
            .command_registry
            .get(command_id)
            .await
            .ok_or_else(|| OgentError::CommandNotFound(command_id.to_string()))?;

        if command.status.is_terminal() {
            return Ok(());
        }

        if command.status == CommandStatus::Pending {
            self.command_registry
                .update(command_id, |c| {
                    c.status = CommandStatus::Failed;
                    c.terminal_at = Some(Utc::now());
                    c.failure_reason = Some("cancelled before dispatch".to_string());
                })
                .await;
            self.command_registry.mark_terminal(command_id).await;
            return Ok(());
        }

        self.fanout
            .send_to_agent(&command.agent_id, &ControllerEvent::CancelCommand { command_id })
            .await
    }

    /// Applies an event the agent emitted for one of its own commands.
    /// Frames for a command that has already reached a terminal state are
    /// logged and dropped rather than treated as an error — a single late
    /// frame is tolerated and just counted.
    pub async fn handle_agent_event(&self, agent_id: &str, event: AgentEvent) -> Result<()> {
        match event {
            AgentEvent::CommandProgress {
                command_id, status, ..
            } => self.handle_progress(agent_id, command_id, status).await,
            AgentEvent::CommandResult {
                command_id,
                exit_code,
                stdout,
                stderr,
                execution_type,
                target_descriptor,
                cancelled,
                ..
            } => {
                self.handle_result(
                    agent_id,
                    command_id,
                    CommandResult {
                        exit_code,
                        stdout,
                        stderr,
                        execution_type,
                        target_descriptor,
                        cancelled,
                    },
                )
                .await
            }
            AgentEvent::AgentInfo { info } => {
                self.agent_registry.update_info(agent_id, info).await;
                Ok(())
            }
            AgentEvent::Register { .. } => Err(OgentError::ProtocolViolation(
                "register event received on an already-registered session".to_string(),
            )),
        }
    }

    async fn handle_progress(
        &self,
        agent_id: &str,
        command_id: Uuid,
        status: ogent_shared::ProgressStatus,
    ) -> Result<()> {
        let command = self
            .command_registry
            .get(command_id)
            .await
            .ok_or_else(|| OgentError::CommandNotFound(command_id.to_string()))?;

        if command.agent_id != agent_id {
            return Err(OgentError::ProtocolViolation(format!(
                "command {command_id} does not belong to agent {agent_id}"
            )));
        }

        if command.status.is_terminal() {
            self.command_registry
                .update(command_id, |c| c.late_frames += 1)
                .await;
            warn!(%command_id, "late progress frame after terminal state");
            return Ok(());
        }

        let _ = status;
        self.command_registry
            .update(command_id, |c| {
                if c.first_progress_at.is_none() {
                    c.first_progress_at = Some(Utc::now());
                }
                c.status = CommandStatus::Running;
            })
            .await;
        Ok(())
    }

    async fn handle_result(
        &self,
        agent_id: &str,
        command_id: Uuid,
        result: CommandResult,
    ) -> Result<()> {
        let command = self
            .command_registry
            .get(command_id)
            .await
            .ok_or_else(|| OgentError::CommandNotFound(command_id.to_string()))?;

        if command.agent_id != agent_id {
            return Err(OgentError::ProtocolViolation(format!(
                "command {command_id} does not belong to agent {agent_id}"
            )));
        }

        if command.status.is_terminal() {
            self.command_registry
                .update(command_id, |c| c.late_frames += 1)
                .await;
            warn!(%command_id, "late result frame after terminal state");
            return Ok(());
        }

        let final_status = if result.cancelled || result.exit_code != 0 {
            CommandStatus::Failed
        } else {
            CommandStatus::Completed
        };

        self.command_registry
            .update(command_id, |c| {
                c.status = final_status;
                c.terminal_at = Some(Utc::now());
                c.result = Some(result);
            })
            .await;
        self.command_registry.mark_terminal(command_id).await;
        info!(%command_id, status = ?final_status, "command reached terminal state");
        Ok(())
    }

    /// On deadline expiry, requests cancellation and gives the agent one
    /// grace window to report a terminal result before giving up on it.
    /// A command that never reaches a terminal state by then is `Lost`,
    /// not `Failed` — the Router can no longer account for its outcome.
    async fn run_deadline_timer(self: Arc<Self>, command_id: Uuid) {
        tokio::time::sleep(self.deadline_default).await;

        let Some(command) = self.command_registry.get(command_id).await else {
            return;
        };
        if command.status.is_terminal() {
            return;
        }

        warn!(%command_id, "command deadline exceeded, requesting cancellation");
        if let Err(e) = self
            .fanout
            .send_to_agent(&command.agent_id, &ControllerEvent::CancelCommand { command_id })
            .await
        {
            warn!(%command_id, error = %e, "failed to deliver cancel_command after deadline");
        }

        tokio::time::sleep(self.grace_interval).await;

        let Some(command) = self.command_registry.get(command_id).await else {
            return;
        };
        if command.status.is_terminal() {
            return;
        }

        warn!(%command_id, "command lost: no terminal result within grace window after deadline cancellation");
        self.command_registry
            .update(command_id, |c| {
                c.status = CommandStatus::Lost;
                c.terminal_at = Some(Utc::now());
                c.failure_reason =
                    Some("deadline exceeded; no terminal result within grace window".to_string());
            })
            .await;
        self.command_registry.mark_terminal(command_id).await;
    }

    /// Starts the grace-interval countdown for a dropped session. If the
    /// agent has not reconnected (i.e. this is still its current session)
    /// once the grace interval elapses, every non-terminal command it owns
    /// is marked `Lost` for the requester.
    pub async fn on_session_dropped(self: Arc<Self>, agent_id: String, session_id: String) {
        tokio::spawn(async move {
            tokio::time::sleep(self.grace_interval).await;

            if !self.agent_registry.remove_session(&agent_id, &session_id).await {
                return;
            }

            let commands = self.command_registry.list_for_agent(&agent_id).await;
            for command in commands {
                if command.status.is_terminal() {
                    continue;
                }
                warn!(%agent_id, command_id = %command.command_id, "command lost: session dropped past grace interval");
                self.command_registry
                    .update(command.command_id, |c| {
                        c.status = CommandStatus::Lost;
                        c.terminal_at = Some(Utc::now());
                        c.failure_reason = Some("session dropped past grace interval".to_string());
                    })
                    .await;
                self.command_registry.mark_terminal(command.command_id).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::HeuristicAiStage;
    use crate::fanout::Fanout;
    use axum::async_trait;
    use std::sync::Mutex;

    struct RecordingFanout {
        sent: Mutex<Vec<(String, ControllerEvent)>>,
        fail_next: bool,
    }

    #[async_trait]
    impl Fanout for RecordingFanout {
        async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<()> {
            if self.fail_next {
                return Err(OgentError::NotDeliverable("no session".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((agent_id.to_string(), event.clone()));
            Ok(())
        }
    }

    async fn router_with_agent(fail_next: bool) -> (Arc<CommandRouter>, Arc<AgentRegistry>) {
        let agent_registry = Arc::new(AgentRegistry::new());
        agent_registry
            .register(
                Some("agent-1".to_string()),
                "session-1".to_string(),
                serde_json::json!({}),
            )
            .await;

        let command_registry = Arc::new(CommandRegistry::new(1000));
        let fanout: Arc<dyn Fanout> = Arc::new(RecordingFanout {
            sent: Mutex::new(Vec::new()),
            fail_next,
        });
        let ai_stage: Arc<dyn AiStage> = Arc::new(HeuristicAiStage::default());

        let router = Arc::new(CommandRouter::new(
            Arc::clone(&agent_registry),
            command_registry,
            fanout,
            ai_stage,
            Duration::from_secs(300),
            Duration::from_secs(30),
        ));
        (router, agent_registry)
    }

    #[tokio::test]
    async fn submit_unknown_agent_fails() {
        let (router, _) = router_with_agent(false).await;
        let result = router
            .submit_command(
                "missing",
                "requester",
                ExecuteCommandRequest {
                    command: "echo hi".to_string(),
                    execution_target: None,
                    use_ai: false,
                    system: None,
                    context: None,
                },
            )
            .await;
        assert!(matches!(result, Err(OgentError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn submit_dispatches_and_transitions_to_dispatched() {
        let (router, _) = router_with_agent(false).await;
        let command = router
            .submit_command(
                "agent-1",
                "requester",
                ExecuteCommandRequest {
                    command: "echo hi".to_string(),
                    execution_target: None,
                    use_ai: false,
                    system: None,
                    context: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Dispatched);
    }

    #[tokio::test]
    async fn undeliverable_command_is_failed_not_rejected() {
        let (router, _) = router_with_agent(true).await;
        let command = router
            .submit_command(
                "agent-1",
                "requester",
                ExecuteCommandRequest {
                    command: "echo hi".to_string(),
                    execution_target: None,
                    use_ai: false,
                    system: None,
                    context: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn unsafe_command_is_rejected_before_dispatch() {
        let (router, _) = router_with_agent(false).await;
        let result = router
            .submit_command(
                "agent-1",
                "requester",
                ExecuteCommandRequest {
                    command: "rm -rf /".to_string(),
                    execution_target: None,
                    use_ai: true,
                    system: None,
                    context: None,
                },
            )
            .await;
        assert!(matches!(result, Err(OgentError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn result_after_terminal_counts_as_late_frame_not_error() {
        let (router, _) = router_with_agent(false).await;
        let command = router
            .submit_command(
                "agent-1",
                "requester",
                ExecuteCommandRequest {
                    command: "echo hi".to_string(),
                    execution_target: None,
                    use_ai: false,
                    system: None,
                    context: None,
                },
            )
            .await
            .unwrap();

        router
            .handle_result(
                "agent-1",
                command.command_id,
                CommandResult {
                    exit_code: 0,
                    stdout: "hi".to_string(),
                    stderr: String::new(),
                    execution_type: ogent_shared::ExecutionType::Local,
                    target_descriptor: None,
                    cancelled: false,
                },
            )
            .await
            .unwrap();

        router
            .handle_result(
                "agent-1",
                command.command_id,
                CommandResult {
                    exit_code: 0,
                    stdout: "hi again".to_string(),
                    stderr: String::new(),
                    execution_type: ogent_shared::ExecutionType::Local,
                    target_descriptor: None,
                    cancelled: false,
                },
            )
            .await
            .unwrap();

        let stored = router.command_registry.get(command.command_id).await.unwrap();
        assert_eq!(stored.late_frames, 1);
    }
}
