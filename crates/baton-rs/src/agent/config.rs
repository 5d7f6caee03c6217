//! Configuration types for a [`Runner`](super::runner::Runner) run.
//!
//! Everything has a working default. Override what you need with the
//! `with_*` builders or struct update syntax:
//!
//! ```ignore
//! let config = RunConfig::new()
//!     .with_max_turns(20)
//!     .with_parallel_tools(true)
//!     .with_tool_timeout(Duration::from_secs(30))
//!     .with_completion(CompletionPolicy::TerminationMarkers);
//!
//! let config = RunConfig {
//!     continuation: Toggle::disabled(),
//!     ..RunConfig::default()
//! };
//! ```

use crate::agent::guardrail::Guardrail;
use crate::api::continuation::ContinuationConfig;
use crate::tools::core::DEFAULT_MAX_RESULT_BYTES;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ── Generic toggle ────────────────────────────────────────────────

/// Enabled/disabled wrapper for an optional module's configuration.
///
/// When `enabled` is `false` the module is skipped regardless of `config`.
#[derive(Debug, Clone)]
pub struct Toggle<T: Default> {
    pub enabled: bool,
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// An enabled instance with the given inner config.
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }

    /// A disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// The inner config, if enabled.
    pub fn active(&self) -> Option<&T> {
        self.enabled.then_some(&self.config)
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self::enabled(T::default())
    }
}

// ── Tool execution ────────────────────────────────────────────────

/// How the Tool Executor dispatches one turn's function calls.
#[derive(Debug, Clone)]
pub struct ToolExecutionConfig {
    /// Run the calls of one turn concurrently. Results are still appended in
    /// call order.
    pub parallel: bool,
    /// Validate arguments against each tool's parameter schema first.
    pub validate_arguments: bool,
    /// Per-call timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Tool output beyond this many bytes is truncated.
    pub max_result_bytes: usize,
}

impl Default for ToolExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            validate_arguments: false,
            timeout: None,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

// ── Completion policy ─────────────────────────────────────────────

/// When a plain assistant message (no calls, no handoff) ends the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// The first plain message is the final output.
    #[default]
    FirstMessage,
    /// Only a message carrying a termination marker ("done", "stop", ...) is
    /// final; any other message prompts another turn.
    TerminationMarkers,
}

// ── Run config ────────────────────────────────────────────────────

/// Per-run settings layered on top of the active agent's own.
#[derive(Clone, Default)]
pub struct RunConfig {
    /// Overrides the active agent's `max_turns`.
    pub max_turns: Option<u32>,
    pub continuation: Toggle<ContinuationConfig>,
    pub tool_execution: ToolExecutionConfig,
    pub completion: CompletionPolicy,
    /// Run before the agent's own input guardrails.
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    /// Run before the agent's own output guardrails.
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    /// Initial caller values visible through the `RunContext`.
    pub context: Map<String, Value>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_continuation(mut self, config: ContinuationConfig) -> Self {
        self.continuation = Toggle::enabled(config);
        self
    }

    pub fn without_continuation(mut self) -> Self {
        self.continuation = Toggle::disabled();
        self
    }

    pub fn with_tool_execution(mut self, config: ToolExecutionConfig) -> Self {
        self.tool_execution = config;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.tool_execution.parallel = parallel;
        self
    }

    pub fn with_argument_validation(mut self, validate: bool) -> Self {
        self.tool_execution.validate_arguments = validate;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_execution.timeout = Some(timeout);
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.tool_execution.max_result_bytes = max;
        self
    }

    pub fn with_completion(mut self, policy: CompletionPolicy) -> Self {
        self.completion = policy;
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: impl Guardrail + 'static) -> Self {
        self.input_guardrails.push(Arc::new(guardrail));
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: impl Guardrail + 'static) -> Self {
        self.output_guardrails.push(Arc::new(guardrail));
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Turn budget for `agent_max_turns`, after the run-level override.
    pub fn effective_max_turns(&self, agent_max_turns: u32) -> u32 {
        self.max_turns.unwrap_or(agent_max_turns)
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("continuation", &self.continuation)
            .field("tool_execution", &self.tool_execution)
            .field("completion", &self.completion)
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .field("context", &self.context)
            .finish()
    }
}
