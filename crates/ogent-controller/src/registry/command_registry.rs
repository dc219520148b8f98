use std::collections::{HashMap, VecDeque};

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use ogent_shared::Command;

/// In-memory registry of commands across their full lifecycle.
/// Completed/Failed/Lost commands are retained up to `retention`, evicted
/// oldest-terminal-first once the bound is exceeded — there is no durable
/// history across Controller restarts, by design.
pub struct CommandRegistry {
    commands: RwLock<HashMap<Uuid, Command>>,
    terminal_order: Mutex<VecDeque<Uuid>>,
    retention: usize,
}

impl CommandRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            terminal_order: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    pub async fn insert(&self, command: Command) {
        self.commands.write().await.insert(command.command_id, command);
    }

    pub async fn get(&self, command_id: Uuid) -> Option<Command> {
        self.commands.read().await.get(&command_id).cloned()
    }

    /// Applies `mutate` to the stored command, if present, and returns the
    /// updated copy.
    pub async fn update<F>(&self, command_id: Uuid, mutate: F) -> Option<Command>
    where
        F: FnOnce(&mut Command),
    {
        let mut commands = self.commands.write().await;
        let command = commands.get_mut(&command_id)?;
        mutate(command);
        Some(command.clone())
    }

    /// Records that `command_id` just reached a terminal status, evicting
    /// the oldest terminal command once `retention` is exceeded.
    pub async fn mark_terminal(&self, command_id: Uuid) {
        let mut order = self.terminal_order.lock().await;
        order.push_back(command_id);

        if order.len() > self.retention {
            if let Some(evicted) = order.pop_front() {
                self.commands.write().await.remove(&evicted);
            }
        }
    }

    /// All commands for an agent, unordered — used by the router's
    /// grace-interval sweep, which only cares about non-terminal status
    /// and has no reason to pay for a sort.
    pub async fn list_for_agent(&self, agent_id: &str) -> Vec<Command> {
        self.commands
            .read()
            .await
            .values()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Most-recent-first listing for an agent, capped at `limit`. Ties on
    /// `created_at` break by `command_id` lexicographic order so the
    /// ordering is total and reproducible.
    pub async fn list_by_agent(&self, agent_id: &str, limit: usize) -> Vec<Command> {
        let mut commands = self.list_for_agent(agent_id).await;
        Self::sort_most_recent_first(&mut commands);
        commands.truncate(limit);
        commands
    }

    /// Most-recent-first listing for a requester, capped at `limit`, with
    /// the same tie-breaking rule as `list_by_agent`.
    pub async fn list_by_requester(&self, requester_id: &str, limit: usize) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .commands
            .read()
            .await
            .values()
            .filter(|c| c.requester_id == requester_id)
            .cloned()
            .collect();
        Self::sort_most_recent_first(&mut commands);
        commands.truncate(limit);
        commands
    }

    fn sort_most_recent_first(commands: &mut [Command]) {
        commands.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.command_id.to_string().cmp(&a.command_id.to_string()))
        });
    }

    /// Removes a command outright, regardless of status. Idempotent: a
    /// missing id is not an error.
    pub async fn delete(&self, command_id: Uuid) {
        self.commands.write().await.remove(&command_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ogent_shared::{CommandStatus, ExecutionTarget};

    fn sample_command(agent_id: &str) -> Command {
        Command {
            command_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            requester_id: "requester-1".to_string(),
            command_text: "echo hi".to_string(),
            processed_command_text: None,
            execution_target: ExecutionTarget::Auto,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            dispatched_at: None,
            first_progress_at: None,
            terminal_at: None,
            result: None,
            failure_reason: None,
            late_frames: 0,
        }
    }

    #[tokio::test]
    async fn retention_evicts_oldest_terminal_command() {
        let registry = CommandRegistry::new(2);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let command = sample_command("agent-1");
            ids.push(command.command_id);
            registry.insert(command).await;
            registry.mark_terminal(ids[ids.len() - 1]).await;
        }

        assert!(registry.get(ids[0]).await.is_none());
        assert!(registry.get(ids[1]).await.is_some());
        assert!(registry.get(ids[2]).await.is_some());
    }

    #[tokio::test]
    async fn list_by_agent_is_most_recent_first_and_capped() {
        let registry = CommandRegistry::new(100);

        let mut older = sample_command("agent-1");
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        let older_id = older.command_id;
        registry.insert(older).await;

        let mut newer = sample_command("agent-1");
        newer.created_at = Utc::now();
        let newer_id = newer.command_id;
        registry.insert(newer).await;

        let listed = registry.list_by_agent("agent-1", 1).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].command_id, newer_id);

        let listed_all = registry.list_by_agent("agent-1", 10).await;
        assert_eq!(listed_all[0].command_id, newer_id);
        assert_eq!(listed_all[1].command_id, older_id);
    }

    #[tokio::test]
    async fn list_by_requester_filters_by_requester_id() {
        let registry = CommandRegistry::new(100);
        let mut mine = sample_command("agent-1");
        mine.requester_id = "alice".to_string();
        let mine_id = mine.command_id;
        registry.insert(mine).await;

        let mut theirs = sample_command("agent-1");
        theirs.requester_id = "bob".to_string();
        registry.insert(theirs).await;

        let listed = registry.list_by_requester("alice", 10).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].command_id, mine_id);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let registry = CommandRegistry::new(10);
        let command = sample_command("agent-1");
        let command_id = command.command_id;
        registry.insert(command).await;

        registry.delete(command_id).await;
        assert!(registry.get(command_id).await.is_none());
        registry.delete(command_id).await; // second call must not panic
    }

    #[tokio::test]
    async fn update_mutates_in_place() {
        let registry = CommandRegistry::new(10);
        let command = sample_command("agent-1");
        let command_id = command.command_id;
        registry.insert(command).await;

        let updated = registry
            .update(command_id, |c| c.status = CommandStatus::Running)
            .await
            .unwrap();

        assert_eq!(updated.status, CommandStatus::Running);
    }
}
