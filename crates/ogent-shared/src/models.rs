use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A live Agent as tracked by the Controller's Agent Registry.
///
/// `agent_id` is stable across reconnects; `session_id` identifies the
/// transport session currently bound to it and changes on every reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub info: serde_json::Value,
}

/// Where a command should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    Auto,
    Local,
    Remote,
}

/// Which executor variant actually produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Local,
    Remote,
}

/// Command lifecycle states, transitioned only by the Router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Lost,
}

impl CommandStatus {
    /// Terminal states no longer accept progress and end the requester's wait.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Lost)
    }
}

/// Terminal outcome of a command, attached once the Command reaches a
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_type: ExecutionType,
    pub target_descriptor: Option<String>,
    pub cancelled: bool,
}

/// A command tracked end to end by the Command Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub agent_id: String,
    pub requester_id: String,
    pub command_text: String,
    pub processed_command_text: Option<String>,
    pub execution_target: ExecutionTarget,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub first_progress_at: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
    pub result: Option<CommandResult>,
    pub failure_reason: Option<String>,
    pub late_frames: u32,
}

impl Command {
    /// The command text the executor should actually run: the AI-processed
    /// rewrite when present, otherwise the requester's original text.
    pub fn effective_text(&self) -> &str {
        self.processed_command_text
            .as_deref()
            .unwrap_or(&self.command_text)
    }
}

// ---- Bootstrap HTTP API DTOs ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub info: serde_json::Value,
}

impl From<Agent> for AgentSummary {
    fn from(agent: Agent) -> Self {
        Self {
            agent_id: agent.agent_id,
            session_id: agent.session_id,
            connected_at: agent.connected_at,
            info: agent.info,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command: String,
    #[serde(default)]
    pub execution_target: Option<ExecutionTarget>,
    #[serde(default)]
    pub use_ai: bool,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommandAccepted {
    pub command_id: Uuid,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub command: String,
}

/// Result of the pre-dispatch AI stage: rewrite, validation,
/// optimization hints, and enrichment metadata, applied before dispatch or
/// returned standalone from `/agents/{id}/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub original_command: String,
    pub processed_command: String,
    pub validation: AiValidation,
    pub optimization: Option<String>,
    pub enrichment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiValidation {
    pub safe: bool,
    pub reason: Option<String>,
}
