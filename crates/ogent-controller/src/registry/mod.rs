pub mod agent_registry;
pub mod command_registry;

pub use agent_registry::AgentRegistry;
pub use command_registry::CommandRegistry;
