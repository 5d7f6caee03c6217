//! Typed lifecycle hooks.
//!
//! [`LifecycleHook`] has one named method per lifecycle point.
//! [`LifecycleHookAdapter`] turns any hook into an [`EventHandler`], so it
//! plugs into a [`CompositeEventHandler`](super::events::CompositeEventHandler)
//! chain and sees the same events in blocking and streaming runs.

use super::events::{EventHandler, EventKind, StreamEvent};
use serde_json::Value;

// ── LifecycleHook trait ────────────────────────────────────────────

/// Typed lifecycle hook.
///
/// All methods have default no-op implementations. Implement only the
/// hooks you need, then wrap with [`LifecycleHookAdapter`].
///
/// # Example
///
/// ```ignore
/// struct AuditHook;
///
/// impl LifecycleHook for AuditHook {
///     fn on_handoff(&self, from: &str, to: &str, _data: &Value) {
///         audit_log(format!("{from} -> {to}"));
///     }
/// }
///
/// let runner = Runner::new(provider).with_event_handler(LifecycleHookAdapter::new(AuditHook));
/// ```
pub trait LifecycleHook: Send + Sync {
    /// An agent is about to take its turn.
    fn on_agent_start(&self, _agent: &str, _turn: u32) {}

    /// An agent produced the run's final output.
    fn on_agent_end(&self, _agent: &str, _output: &Value) {}

    /// The active agent changed.
    fn on_handoff(&self, _from: &str, _to: &str, _data: &Value) {}

    /// A tool (or action) is about to run with the given raw arguments.
    fn on_tool_start(&self, _tool: &str, _arguments: &str) {}

    /// A tool finished; `output` is what the model will see.
    fn on_tool_end(&self, _tool: &str, _output: &str) {}

    /// A tool failed; the failure was recovered into the conversation.
    fn on_tool_error(&self, _tool: &str, _error: &str) {}
}

// ── LifecycleHookAdapter ───────────────────────────────────────────

/// Adapts a [`LifecycleHook`] into an [`EventHandler`].
///
/// - `AgentStart` → `on_agent_start()`
/// - `AgentFinish` → `on_agent_end()`
/// - `AgentHandoff` → `on_handoff()`
/// - `ToolExecutionStart` / `Complete` / `Error` → `on_tool_start()` /
///   `on_tool_end()` / `on_tool_error()`
pub struct LifecycleHookAdapter<H: LifecycleHook> {
    hook: H,
}

impl<H: LifecycleHook> LifecycleHookAdapter<H> {
    pub fn new(hook: H) -> Self {
        Self { hook }
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }
}

impl<H: LifecycleHook> EventHandler for LifecycleHookAdapter<H> {
    fn on_event(&self, event: &StreamEvent) {
        match &event.kind {
            EventKind::AgentStart { agent, turn } => self.hook.on_agent_start(agent, *turn),
            EventKind::AgentFinish { agent, output, .. } => self.hook.on_agent_end(agent, output),
            EventKind::AgentHandoff { from, to, data } => self.hook.on_handoff(from, to, data),
            EventKind::ToolExecutionStart {
                name, arguments, ..
            } => self.hook.on_tool_start(name, arguments),
            EventKind::ToolExecutionComplete { name, output, .. } => {
                self.hook.on_tool_end(name, output)
            }
            EventKind::ToolExecutionError { name, error, .. } => {
                self.hook.on_tool_error(name, error)
            }
            _ => {}
        }
    }
}
