use axum::extract::ws::WebSocketUpgrade;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ogent_shared::{AgentEvent, ControllerEvent, RegisterAckStatus};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentWebSocketQuery {
    pub token: String,
}

/// Upgrades the bidirectional event channel. The agent authenticates
/// with the same bearer token the bootstrap API issues,
/// passed as a query parameter since a WebSocket upgrade request carries no
/// body and most clients can't set an `Authorization` header on it.
pub async fn handle_agent_websocket(
    ws: WebSocketUpgrade,
    Query(params): Query<AgentWebSocketQuery>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    if state.auth_service.verify_token(&params.token).is_err() {
        warn!("rejected agent WebSocket connection: invalid token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(ws.on_upgrade(move |socket| handle_agent_socket(socket, state)))
}

async fn handle_agent_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // The first frame must be a `register` event; until then we don't know
    // which agent this session belongs to.
    let Some(Ok(Message::Text(text))) = receiver.next().await else {
        warn!("agent socket closed before sending register");
        return;
    };

    let Ok(AgentEvent::Register { agent_id, info }) = serde_json::from_str::<AgentEvent>(&text)
    else {
        warn!("first frame on agent socket was not a register event");
        return;
    };

    // The session id is generated up front so the registry can synthesize
    // `agent_id` from it (`agent-<session>`) when the agent doesn't supply
    // one, and the connection manager keys its entry under the same session.
    let session_id = uuid::Uuid::new_v4();
    let agent = state
        .agent_registry
        .register(agent_id, session_id.to_string(), info)
        .await;
    let agent_id = agent.agent_id.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state
        .connection_manager
        .add_agent_connection(&agent_id, session_id, tx)
        .await;

    let ack = ControllerEvent::RegisterAck {
        assigned_agent_id: agent_id.clone(),
        status: RegisterAckStatus::Ok,
    };
    if let Ok(payload) = serde_json::to_string(&ack) {
        let _ = sender.send(Message::Text(payload)).await;
    }

    info!(%agent_id, %session_id, "agent registered over websocket");

    let outgoing_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let incoming_agent_id = agent_id.clone();
    let incoming_state = state.clone();
    let incoming_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!(agent_id = %incoming_agent_id, "received frame");
                    match serde_json::from_str::<AgentEvent>(&text) {
                        Ok(event) => {
                            if let Err(e) = incoming_state
                                .router
                                .handle_agent_event(&incoming_agent_id, event)
                                .await
                            {
                                warn!(agent_id = %incoming_agent_id, error = %e, "protocol violation");
                            }
                        }
                        Err(e) => {
                            warn!(agent_id = %incoming_agent_id, error = %e, "failed to parse agent frame");
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!(agent_id = %incoming_agent_id, "agent closed websocket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(agent_id = %incoming_agent_id, error = %e, "websocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = outgoing_task => {}
        _ = incoming_task => {}
    }

    state.connection_manager.remove_connection(session_id).await;
    state
        .router
        .clone()
        .on_session_dropped(agent_id, session_id.to_string())
        .await;
}
