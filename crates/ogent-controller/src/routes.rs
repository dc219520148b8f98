use axum::{
    routing::{get, post},
    Router,
};

use crate::{
    handlers::{agents, auth, commands},
    websocket::agent_handler,
    AppState,
};

pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(auth::token))
        .route("/agents", get(agents::list_agents))
        .route("/agents/:agent_id", get(agents::get_agent))
        .route("/agents/:agent_id/execute", post(commands::execute_command))
        .route("/agents/:agent_id/analyze", post(commands::analyze_command))
        .route(
            "/agents/:agent_id/commands",
            get(commands::list_commands_for_agent),
        )
        .route("/commands/:command_id", get(commands::get_command))
        .route("/ws/agent", get(agent_handler::handle_agent_websocket))
}
