use thiserror::Error;

/// Error taxonomy for the dispatch and lifecycle subsystem.
///
/// Variants map 1:1 onto the error-kind table: each kind is surfaced
/// differently depending on where it originates (HTTP response, command
/// terminal state, or session teardown) — see the call sites in
/// `ogent-controller` for how each variant is translated.
#[derive(Error, Debug)]
pub enum OgentError {
    #[error("authentication failed")]
    AuthFailure,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("agent {0} is not deliverable")]
    NotDeliverable(String),

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("command cancelled")]
    Cancelled,

    #[error("command lost: session dropped past grace interval")]
    Lost,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("AI backend error: {0}")]
    AiBackend(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, OgentError>;
