pub mod ai;
pub mod config;
pub mod fanout;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod routes;
pub mod services;
pub mod telemetry;
pub mod websocket;

pub use routes::create_api_routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use ai::HeuristicAiStage;
use config::Config;
use fanout::{Fanout, InMemoryFanout};
use registry::{AgentRegistry, CommandRegistry};
use router::CommandRouter;
use services::auth_service::AuthService;
use websocket::connection_manager::ConnectionManager;

/// Shared state handed to every axum handler: the registries, the command
/// router, the connection manager, and the services bootstrap auth needs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agent_registry: Arc<AgentRegistry>,
    pub command_registry: Arc<CommandRegistry>,
    pub connection_manager: ConnectionManager,
    pub router: Arc<CommandRouter>,
    pub auth_service: AuthService,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let agent_registry = Arc::new(AgentRegistry::new());
        let command_registry = Arc::new(CommandRegistry::new(config.command_retention));
        let connection_manager = ConnectionManager::new();

        let fanout: Arc<dyn Fanout> = Arc::new(InMemoryFanout::new(connection_manager.clone()));
        let ai_stage = Arc::new(HeuristicAiStage::default());

        let router = Arc::new(CommandRouter::new(
            Arc::clone(&agent_registry),
            Arc::clone(&command_registry),
            fanout,
            ai_stage,
            Duration::from_secs(config.command_deadline_default_secs),
            Duration::from_secs(config.grace_interval_secs),
        ));

        let auth_service = AuthService::new(
            config.jwt_secret.clone(),
            config.admin_username.clone(),
            &config.admin_password,
            config.token_ttl_minutes,
        );

        Self {
            config,
            agent_registry,
            command_registry,
            connection_manager,
            router,
            auth_service,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(handlers::health::health_check))
        .merge(create_api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
