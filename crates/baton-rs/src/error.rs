//! Error taxonomy for a run.
//!
//! [`RunError`] is the only error that escapes [`Runner::run`](crate::agent::runner::Runner::run).
//! [`ToolError`] never does: the tool executor turns it into a
//! `FunctionCallOutput` item so the model can react to it.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Fatal errors that terminate a run.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("max turns exceeded: no final output after {max_turns} turn(s)")]
    MaxTurns { max_turns: u32 },

    #[error("input guardrail '{guardrail}' tripwire triggered: {message}")]
    InputGuardrailTripwire { guardrail: String, message: String },

    #[error("output guardrail '{guardrail}' tripwire triggered: {message}")]
    OutputGuardrailTripwire {
        guardrail: String,
        message: String,
        /// The final output that was computed before the tripwire fired.
        output: Value,
    },

    #[error("handoff failed: {0}")]
    Handoff(#[from] HandoffError),

    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("session store failed: {0}")]
    Session(#[from] SessionError),

    #[error("agent '{0}' is not registered")]
    AgentNotFound(String),

    #[error("background run task failed: {0}")]
    TaskFailed(String),
}

impl RunError {
    /// Whether an external retry collaborator may re-invoke the run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunError::Provider(e) if e.is_retryable())
    }
}

/// Handoff validation and execution failures. Always terminal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("No target agent set")]
    NoTarget,

    #[error("Circular handoff detected: agent '{agent}' is already in the handoff chain")]
    Circular { agent: String },

    #[error("unknown handoff target agent '{0}'")]
    UnknownAgent(String),

    #[error("handoff condition not met for agent '{target}'")]
    ConditionNotMet { target: String },

    #[error("invalid handoff config: {0}")]
    InvalidConfig(String),
}

/// Category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Authentication,
    InvalidRequest,
    RateLimited,
    Server,
    Timeout,
    Transport,
    Unsupported,
    /// The model itself reported an error finish.
    ModelError,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid request",
            Self::RateLimited => "rate limited",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Unsupported => "unsupported",
            Self::ModelError => "model",
        };
        f.write_str(s)
    }
}

/// An error returned by a [`Provider`](crate::api::provider::Provider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Server, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Rate-limit, server, timeout and transport failures may succeed on a
    /// later attempt. Authentication and invalid-request failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited
                | ProviderErrorKind::Server
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Transport
        )
    }
}

/// A recovered tool failure. Rendered into the conversation as
/// `"Tool execution failed: <message>"`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool '{0}'")]
    NotFound(String),

    #[error("tool '{name}' is disabled: {reason}")]
    Disabled { name: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("tool '{name}' timed out after {seconds:.1}s")]
    Timeout { name: String, seconds: f64 },
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

/// Session store and record failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid session record: {0}")]
    InvalidRecord(String),

    #[error("session serialization failed: {0}")]
    Serialization(String),

    #[error("session storage failed: {0}")]
    Storage(String),
}
