use axum::async_trait;
use ogent_shared::{ControllerEvent, OgentError, Result};

use crate::websocket::connection_manager::ConnectionManager;

/// Horizontal-scale fan-out contract: delivers a `ControllerEvent` to
/// whichever replica currently holds the agent's live session. The default
/// implementation assumes a single replica and talks to its own
/// `ConnectionManager` directly.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<()>;
}

pub struct InMemoryFanout {
    connection_manager: ConnectionManager,
}

impl InMemoryFanout {
    pub const fn new(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl Fanout for InMemoryFanout {
    async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<()> {
        self.connection_manager
            .send_to_agent(agent_id, event)
            .await
            .map_err(OgentError::NotDeliverable)
    }
}

/// Sketch of a multi-replica fan-out adapter: publishes onto a per-agent
/// Redis channel so whichever replica holds the session's socket can pick
/// the event back up. Not wired by default; enable with `--features
/// redis-fanout` and point `messaging_url` at a reachable Redis instance.
#[cfg(feature = "redis-fanout")]
pub struct RedisFanout {
    client: redis::Client,
}

#[cfg(feature = "redis-fanout")]
impl RedisFanout {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| OgentError::InternalError(e.to_string()))?;
        Ok(Self { client })
    }

    fn channel_for(agent_id: &str) -> String {
        format!("ogent:agent:{agent_id}")
    }
}

#[cfg(feature = "redis-fanout")]
#[async_trait]
impl Fanout for RedisFanout {
    async fn send_to_agent(&self, agent_id: &str, event: &ControllerEvent) -> Result<()> {
        use redis::AsyncCommands;

        let payload = serde_json::to_string(event)
            .map_err(|e| OgentError::InternalError(e.to_string()))?;

        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| OgentError::InternalError(e.to_string()))?;

        conn.publish(Self::channel_for(agent_id), payload)
            .await
            .map_err(|e| OgentError::NotDeliverable(e.to_string()))
    }
}
