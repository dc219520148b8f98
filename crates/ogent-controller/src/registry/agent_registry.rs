use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use ogent_shared::Agent;

/// In-memory registry of live Agents. No durable storage — an Agent entry
/// exists only while (or briefly after) its session is live.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an agent session. If `agent_id` is absent, one is
    /// synthesized from `session_id`; if present, the agent-supplied id is
    /// authoritative and any prior entry under that id is replaced (a
    /// reconnect).
    pub async fn register(
        &self,
        agent_id: Option<String>,
        session_id: String,
        info: serde_json::Value,
    ) -> Agent {
        let agent_id = agent_id.unwrap_or_else(|| format!("agent-{session_id}"));

        let agent = Agent {
            agent_id: agent_id.clone(),
            session_id,
            connected_at: Utc::now(),
            info,
        };

        self.agents.write().await.insert(agent_id, agent.clone());
        agent
    }

    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn list(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Reverse lookup: the live agent currently bound to `session_id`, if
    /// any. Scans the registry rather than maintaining a second index,
    /// since registry operations are not suspension points and the live
    /// agent count is small.
    pub async fn by_session(&self, session_id: &str) -> Option<Agent> {
        self.agents
            .read()
            .await
            .values()
            .find(|agent| agent.session_id == session_id)
            .cloned()
    }

    /// Removes the registry entry unconditionally, regardless of which
    /// session it is currently bound to. Idempotent: unregistering an
    /// absent or already-removed `agent_id` yields the same registry state.
    pub async fn unregister(&self, agent_id: &str) {
        self.agents.write().await.remove(agent_id);
    }

    /// Removes the registry entry, but only if `session_id` still matches
    /// the one on record — a dropped stale session must not remove an
    /// entry a newer reconnect has since replaced.
    pub async fn remove_session(&self, agent_id: &str, session_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get(agent_id) {
            if agent.session_id == session_id {
                agents.remove(agent_id);
                return true;
            }
        }
        false
    }

    pub async fn update_info(&self, agent_id: &str, info: serde_json::Value) -> bool {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(agent_id) {
            agent.info = info;
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthesizes_id_from_session_when_absent() {
        let registry = AgentRegistry::new();
        let agent = registry
            .register(None, "session-1".to_string(), serde_json::json!({}))
            .await;

        assert_eq!(agent.agent_id, "agent-session-1");
        assert!(registry.is_connected(&agent.agent_id).await);
    }

    #[tokio::test]
    async fn agent_supplied_id_is_authoritative() {
        let registry = AgentRegistry::new();
        let agent = registry
            .register(
                Some("fixed-id".to_string()),
                "session-1".to_string(),
                serde_json::json!({}),
            )
            .await;

        assert_eq!(agent.agent_id, "fixed-id");
    }

    #[tokio::test]
    async fn stale_session_removal_does_not_clobber_reconnect() {
        let registry = AgentRegistry::new();
        registry
            .register(
                Some("agent-1".to_string()),
                "session-old".to_string(),
                serde_json::json!({}),
            )
            .await;
        registry
            .register(
                Some("agent-1".to_string()),
                "session-new".to_string(),
                serde_json::json!({}),
            )
            .await;

        let removed = registry.remove_session("agent-1", "session-old").await;
        assert!(!removed);
        assert!(registry.is_connected("agent-1").await);
    }

    #[tokio::test]
    async fn by_session_finds_the_agent_bound_to_it() {
        let registry = AgentRegistry::new();
        registry
            .register(
                Some("agent-1".to_string()),
                "session-1".to_string(),
                serde_json::json!({}),
            )
            .await;

        let found = registry.by_session("session-1").await.unwrap();
        assert_eq!(found.agent_id, "agent-1");
        assert!(registry.by_session("session-missing").await.is_none());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = AgentRegistry::new();
        registry
            .register(
                Some("agent-1".to_string()),
                "session-1".to_string(),
                serde_json::json!({}),
            )
            .await;

        registry.unregister("agent-1").await;
        assert!(!registry.is_connected("agent-1").await);
        registry.unregister("agent-1").await; // second call must not panic
        assert!(!registry.is_connected("agent-1").await);
    }
}
