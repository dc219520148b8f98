use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use ogent_shared::AgentSummary;

use crate::{handlers::auth::handle_error, middleware::auth::AuthUser, AppState};

pub async fn list_agents(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Json<Vec<AgentSummary>> {
    let agents = state.agent_registry.list().await;
    Json(agents.into_iter().map(AgentSummary::from).collect())
}

pub async fn get_agent(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentSummary>, (StatusCode, Json<serde_json::Value>)> {
    let agent = state
        .agent_registry
        .get(&agent_id)
        .await
        .ok_or_else(|| handle_error(ogent_shared::OgentError::AgentNotFound(agent_id)))?;

    Ok(Json(AgentSummary::from(agent)))
}
