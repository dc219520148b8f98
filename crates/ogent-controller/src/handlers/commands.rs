use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use ogent_shared::{
    AiAnalysis, AnalyzeRequest, Command, ExecuteCommandAccepted, ExecuteCommandRequest, OgentError,
};

use crate::{handlers::auth::handle_error, middleware::auth::AuthUser, AppState};

const COMMAND_LIST_LIMIT: usize = 100;

pub async fn execute_command(
    AuthUser(requester_id): AuthUser,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<ExecuteCommandRequest>,
) -> Result<(StatusCode, Json<ExecuteCommandAccepted>), (StatusCode, Json<serde_json::Value>)> {
    let command = state
        .router
        .submit_command(&agent_id, &requester_id, request)
        .await
        .map_err(handle_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteCommandAccepted {
            command_id: command.command_id,
            status: command.status,
        }),
    ))
}

pub async fn analyze_command(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(_agent_id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> Json<AiAnalysis> {
    Json(state.router.analyze(&request))
}

/// Fetches a single command's retained record (`GET /commands/{id}`), for a
/// requester polling for progress or a terminal result after the initial
/// `Dispatched` envelope. Scoped to the requester that submitted it — one
/// requester must never be able to read another's command.
pub async fn get_command(
    AuthUser(requester_id): AuthUser,
    State(state): State<AppState>,
    Path(command_id): Path<uuid::Uuid>,
) -> Result<Json<Command>, (StatusCode, Json<serde_json::Value>)> {
    let command = state
        .command_registry
        .get(command_id)
        .await
        .filter(|c| c.requester_id == requester_id)
        .ok_or_else(|| OgentError::CommandNotFound(format!("command {command_id} not found")))
        .map_err(handle_error)?;

    Ok(Json(command))
}

/// Lists the requesting caller's own commands against `agent_id`, most
/// recent first (`GET /agents/{id}/commands`). Filters on the requester's
/// own commands rather than listing everything sent to the agent, so one
/// requester can't see another's history through a shared agent.
pub async fn list_commands_for_agent(
    AuthUser(requester_id): AuthUser,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Json<Vec<Command>> {
    let commands = state
        .command_registry
        .list_by_requester(&requester_id, COMMAND_LIST_LIMIT)
        .await
        .into_iter()
        .filter(|c| c.agent_id == agent_id)
        .collect();

    Json(commands)
}
