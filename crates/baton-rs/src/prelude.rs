//! Convenience re-exports for common `baton-rs` types.
//!
//! ```ignore
//! use baton_rs::prelude::*;
//! ```
//!
//! Covers defining agents and tools, running them and observing the run.
//! Lower-level pieces (the step processor, continuation internals, vendor
//! chunk assembly) are left to their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ConversationItem, FinishReason, ModelResponse, Role, ToolDef, Usage, json_schema_for,
};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    Agent, AgentRegistry, CompletionPolicy, CompositeEventHandler, EventHandler, EventKind,
    FnEventHandler, FnGuardrail, Guardrail, GuardrailPayload, GuardrailVerdict, HandoffConfig,
    LifecycleHook, LifecycleHookAdapter, LoggingHandler, MemorySessionStore, NoopHandler,
    RunConfig, RunContext, RunResult, Runner, Session, SessionStore, StreamEvent, StreamedRun,
    ToolWrapper,
};

// ── Provider seam ───────────────────────────────────────────────────
pub use crate::api::{
    ContinuationConfig, ModelRequest, ModelSettings, Provider, ProviderFuture, RetryConfig,
    ToolChoice, retry_run,
};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolFuture, ToolOutput, ToolSet, parse_tool_args};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ProviderError, RunError, SessionError, ToolError};
