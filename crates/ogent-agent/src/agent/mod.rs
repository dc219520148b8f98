pub mod core;

pub use core::{AgentCore, ShutdownReason};
