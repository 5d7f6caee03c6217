//! Agent runtime: the [`Runner`] loop and everything it drives.
//!
//! - [`runner`]: [`Runner`] and [`RunResult`]. Start here.
//! - [`step`]: the per-response state machine deciding between running
//!   again, handing off and finishing.
//! - [`response`]: canonicalization of a [`ModelResponse`](crate::ModelResponse)
//!   into conversation items and call requests.
//! - [`execution`]: sequential or parallel tool execution, the
//!   [`ToolWrapper`] seam and the termination-marker check.
//! - [`actions`]: computer and shell actions routed to agent-owned executors.
//! - [`handoff`]: handoff configuration, the synthesized `transfer_to_*`
//!   tools and cycle-checked [`HandoffContext`].
//! - [`guardrail`]: input and output tripwires.
//! - [`events`] and [`hooks`]: observing a run.
//! - [`stream`]: the consumer handle of a streamed run.
//! - [`session`]: conversations persisted between runs.

pub mod actions;
pub mod config;
pub mod context;
pub mod definition;
pub mod events;
pub mod execution;
pub mod guardrail;
pub mod handoff;
pub mod hooks;
pub mod response;
pub mod runner;
pub mod session;
pub mod step;
pub mod stream;

// Re-export commonly used items at the module level.
pub use actions::{ComputerExecutor, ShellExecutor, ShellRequest};
pub use config::{CompletionPolicy, RunConfig, Toggle, ToolExecutionConfig};
pub use context::RunContext;
pub use definition::{Agent, AgentRegistry};
pub use events::{
    CompositeEventHandler, EventHandler, EventKind, FnEventHandler, LoggingHandler, NoopHandler,
    StreamEvent,
};
pub use execution::{ToolInvocation, ToolWrapper};
pub use guardrail::{FnGuardrail, Guardrail, GuardrailPayload, GuardrailVerdict};
pub use handoff::{HandoffCallback, HandoffConfig, HandoffContext, HandoffLink};
pub use hooks::{LifecycleHook, LifecycleHookAdapter};
pub use runner::{RunResult, Runner};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use step::{NextStep, StepResult};
pub use stream::StreamedRun;
