//! End-to-end dispatch scenarios driven directly against the Router and
//! registries, the way the corresponding workflow tests in this codebase
//! exercise services without going over a real socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::async_trait;
use chrono::Utc;
use ogent_controller::ai::HeuristicAiStage;
use ogent_controller::fanout::Fanout;
use ogent_controller::registry::{AgentRegistry, CommandRegistry};
use ogent_controller::router::CommandRouter;
use ogent_shared::{
    AgentEvent, CommandStatus, ControllerEvent, ExecuteCommandRequest, ExecutionType,
    OgentError, Result,
};

type SentEvents = Arc<Mutex<Vec<(String, ControllerEvent)>>>;

struct RecordingFanout {
    sent: SentEvents,
    deliverable: bool,
}

#[async_trait]
impl Fanout for RecordingFanout {
    async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<()> {
        if !self.deliverable {
            return Err(OgentError::NotDeliverable(format!("agent {agent_id} unreachable")));
        }
        self.sent.lock().unwrap().push((agent_id.to_string(), event.clone()));
        Ok(())
    }
}

struct Harness {
    router: Arc<CommandRouter>,
    agent_registry: Arc<AgentRegistry>,
    command_registry: Arc<CommandRegistry>,
    sent_events: SentEvents,
}

async fn harness(deliverable: bool, deadline: Duration, grace: Duration) -> Harness {
    let agent_registry = Arc::new(AgentRegistry::new());
    agent_registry
        .register(
            Some("agent-1".to_string()),
            "session-1".to_string(),
            serde_json::json!({"platform": "Linux"}),
        )
        .await;

    let command_registry = Arc::new(CommandRegistry::new(1000));
    let sent_events: SentEvents = Arc::new(Mutex::new(Vec::new()));
    let fanout: Arc<dyn Fanout> = Arc::new(RecordingFanout {
        sent: Arc::clone(&sent_events),
        deliverable,
    });
    let ai_stage = Arc::new(HeuristicAiStage::default());

    let router = Arc::new(CommandRouter::new(
        Arc::clone(&agent_registry),
        Arc::clone(&command_registry),
        fanout,
        ai_stage,
        deadline,
        grace,
    ));

    Harness {
        router,
        agent_registry,
        command_registry,
        sent_events,
    }
}

fn execute_request(command: &str) -> ExecuteCommandRequest {
    ExecuteCommandRequest {
        command: command.to_string(),
        execution_target: None,
        use_ai: false,
        system: None,
        context: None,
    }
}

fn result_event(command_id: uuid::Uuid, exit_code: i32, stdout: &str) -> AgentEvent {
    AgentEvent::CommandResult {
        command_id,
        exit_code,
        stdout: stdout.to_string(),
        stderr: String::new(),
        execution_type: ExecutionType::Local,
        target_descriptor: None,
        cancelled: false,
        ts: Utc::now(),
    }
}

/// A successful local echo reaches a terminal `Completed` with the
/// agent's reported output once its `command_result` arrives.
#[tokio::test]
async fn successful_local_echo_reaches_completed() {
    let h = harness(true, Duration::from_secs(300), Duration::from_secs(30)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("echo hi"))
        .await
        .unwrap();
    assert_eq!(command.status, CommandStatus::Dispatched);

    h.router
        .handle_agent_event("agent-1", result_event(command.command_id, 0, "hi\n"))
        .await
        .unwrap();

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Completed);
    assert_eq!(stored.result.unwrap().stdout, "hi\n");
}

/// Dispatching to a never-registered agent fails without ever touching
/// the event protocol, and the requester sees the rejection immediately.
#[tokio::test]
async fn unknown_agent_rejected_before_dispatch() {
    let h = harness(true, Duration::from_secs(300), Duration::from_secs(30)).await;

    let result = h
        .router
        .submit_command("agent-ghost", "requester-1", execute_request("echo hi"))
        .await;

    assert!(matches!(result, Err(OgentError::AgentNotFound(_))));
}

/// A command flagged unsafe by the AI stage never dispatches.
#[tokio::test]
async fn unsafe_command_rejected_by_ai() {
    let h = harness(true, Duration::from_secs(300), Duration::from_secs(30)).await;

    let request = ExecuteCommandRequest {
        command: "rm -rf /".to_string(),
        execution_target: None,
        use_ai: true,
        system: None,
        context: None,
    };

    let result = h.router.submit_command("agent-1", "requester-1", request).await;
    assert!(matches!(result, Err(OgentError::InvalidInput(_))));
}

/// A command whose deadline fires before any terminal result arrives gets a
/// `cancel_command` from the Router's own timer, and becomes `Lost` — not
/// `Failed` — once the post-deadline grace window elapses with no terminal
/// result, without the requester ever hanging.
#[tokio::test]
async fn deadline_exceeded_without_agent_response() {
    let h = harness(true, Duration::from_millis(50), Duration::from_millis(100)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("sleep 9999"))
        .await
        .unwrap();
    assert_eq!(command.status, CommandStatus::Dispatched);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The deadline has fired but the grace window hasn't: a cancel_command
    // must already be on the wire while the command is still non-terminal.
    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert!(!stored.status.is_terminal());
    assert!(h
        .sent_events
        .lock()
        .unwrap()
        .iter()
        .any(|(agent_id, event)| agent_id == "agent-1"
            && matches!(event, ControllerEvent::CancelCommand { command_id } if *command_id == command.command_id)));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Lost);
    assert!(stored.failure_reason.unwrap().contains("deadline"));
}

/// Once a session drops and the grace interval elapses without a
/// reconnect, every non-terminal command bound to that agent becomes
/// `Lost`, and a late result afterward is only counted, never allowed to
/// regress the terminal state.
#[tokio::test]
async fn session_drop_past_grace_marks_commands_lost() {
    let h = harness(true, Duration::from_secs(300), Duration::from_millis(50)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("sleep 30"))
        .await
        .unwrap();

    Arc::clone(&h.router)
        .on_session_dropped("agent-1".to_string(), "session-1".to_string())
        .await;

    tokio::time::sleep(Duration::from_millis(250)).await;

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Lost);
    assert!(!h.agent_registry.is_connected("agent-1").await);

    h.router
        .handle_agent_event("agent-1", result_event(command.command_id, 0, "too late"))
        .await
        .unwrap();

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Lost);
    assert_eq!(stored.late_frames, 1);
}

/// A session drop followed by a reconnect before the grace interval elapses
/// must not touch any in-flight command.
#[tokio::test]
async fn reconnect_within_grace_interval_preserves_in_flight_commands() {
    let h = harness(true, Duration::from_secs(300), Duration::from_millis(100)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("sleep 30"))
        .await
        .unwrap();

    Arc::clone(&h.router)
        .on_session_dropped("agent-1".to_string(), "session-1".to_string())
        .await;

    // Reconnect under a new session before the grace interval elapses.
    h.agent_registry
        .register(
            Some("agent-1".to_string()),
            "session-2".to_string(),
            serde_json::json!({}),
        )
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Dispatched);
    assert!(h.agent_registry.is_connected("agent-1").await);
}

/// Undeliverable dispatch (fanout failure) yields a `Failed` command
/// outcome rather than an error the requester must special-case.
#[tokio::test]
async fn undeliverable_dispatch_yields_failed_command_not_rejected() {
    let h = harness(false, Duration::from_secs(300), Duration::from_secs(30)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("echo hi"))
        .await
        .unwrap();

    assert_eq!(command.status, CommandStatus::Failed);
    assert!(command.failure_reason.is_some());
}

/// A cancellation requested before dispatch completes fails the command
/// immediately instead of waiting on an agent that never saw it run.
#[tokio::test]
async fn cancel_before_dispatch_fails_immediately() {
    let h = harness(true, Duration::from_secs(300), Duration::from_secs(30)).await;

    let command = h
        .router
        .submit_command("agent-1", "requester-1", execute_request("echo hi"))
        .await
        .unwrap();

    // Force the command back to Pending to emulate a cancel racing dispatch.
    h.command_registry
        .update(command.command_id, |c| c.status = CommandStatus::Pending)
        .await;

    h.router.cancel_command(command.command_id).await.unwrap();

    let stored = h.command_registry.get(command.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Failed);
}
