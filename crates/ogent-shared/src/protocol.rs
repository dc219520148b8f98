use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ExecutionTarget;
use crate::ExecutionType;

/// Named events sent from an Agent to the Controller over the persistent
/// WebSocket channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum AgentEvent {
    Register {
        #[serde(default)]
        agent_id: Option<String>,
        info: serde_json::Value,
    },
    CommandProgress {
        command_id: Uuid,
        status: ProgressStatus,
        #[serde(default)]
        progress: Option<f32>,
        #[serde(default)]
        stdout_chunk: Option<String>,
        #[serde(default)]
        stderr_chunk: Option<String>,
        #[serde(default)]
        message: Option<String>,
        ts: DateTime<Utc>,
    },
    CommandResult {
        command_id: Uuid,
        exit_code: i32,
        stdout: String,
        stderr: String,
        execution_type: ExecutionType,
        #[serde(default)]
        target_descriptor: Option<String>,
        #[serde(default)]
        cancelled: bool,
        ts: DateTime<Utc>,
    },
    AgentInfo {
        info: serde_json::Value,
    },
}

/// Named events sent from the Controller to an Agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ControllerEvent {
    RegisterAck {
        assigned_agent_id: String,
        status: RegisterAckStatus,
    },
    ExecuteCommand {
        command_id: Uuid,
        command: String,
        execution_target: ExecutionTarget,
        requester_id: String,
    },
    CancelCommand {
        command_id: Uuid,
    },
    AgentInfo {
        info: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum RegisterAckStatus {
    Ok,
    Rejected { reason: String },
}
