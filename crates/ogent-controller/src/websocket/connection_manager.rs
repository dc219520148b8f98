use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::info;
use uuid::Uuid;

use ogent_shared::ControllerEvent;

struct Connection {
    agent_id: String,
    session_id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

/// Tracks the live WebSocket session for each connected agent, following
/// the same connection-registry shape used for agent/dashboard sockets
/// elsewhere in this codebase: one `HashMap` of sessions plus an index from
/// agent id to its current session, both behind an `RwLock`.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    agent_sessions: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            agent_sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new session for `agent_id`, displacing any previous
    /// session recorded for it (a reconnect always wins over a stale one).
    /// `session_id` is generated by the caller up front, since the registry
    /// synthesizes `agent_id` from it when the agent doesn't supply one.
    pub async fn add_agent_connection(
        &self,
        agent_id: &str,
        session_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let connection = Connection {
            agent_id: agent_id.to_string(),
            session_id,
            sender,
        };

        let mut connections = self.connections.write().await;
        let mut agent_sessions = self.agent_sessions.write().await;

        connections.insert(session_id, connection);
        agent_sessions.insert(agent_id.to_string(), session_id);

        info!(agent_id, %session_id, "agent session registered");
    }

    /// Removes a session, but only if it is still the one on record for its
    /// agent — a session superseded by a newer reconnect must not clobber
    /// the newer entry when its own socket tears down.
    pub async fn remove_connection(&self, session_id: Uuid) {
        let mut connections = self.connections.write().await;

        if let Some(connection) = connections.remove(&session_id) {
            let mut agent_sessions = self.agent_sessions.write().await;
            if agent_sessions.get(&connection.agent_id) == Some(&session_id) {
                agent_sessions.remove(&connection.agent_id);
            }
            info!(agent_id = %connection.agent_id, %session_id, "agent session closed");
        }
    }

    pub async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<(), String> {
        let agent_sessions = self.agent_sessions.read().await;
        let connections = self.connections.read().await;

        let session_id = agent_sessions
            .get(agent_id)
            .ok_or_else(|| format!("agent {agent_id} not connected"))?;

        let connection = connections
            .get(session_id)
            .ok_or_else(|| format!("agent {agent_id} session missing"))?;

        let payload = serde_json::to_string(event)
            .map_err(|e| format!("failed to serialize event: {e}"))?;

        connection
            .sender
            .send(payload)
            .map_err(|e| format!("failed to send to agent {agent_id}: {e}"))
    }

    pub async fn current_session(&self, agent_id: &str) -> Option<Uuid> {
        self.agent_sessions.read().await.get(agent_id).copied()
    }

    pub async fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.agent_sessions.read().await.contains_key(agent_id)
    }

    pub async fn connected_agent_count(&self) -> usize {
        self.agent_sessions.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
