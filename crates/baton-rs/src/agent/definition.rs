//! Agent definitions and the name-keyed agent registry.

use crate::DEFAULT_MODEL;
use crate::agent::actions::{ComputerExecutor, ShellExecutor};
use crate::agent::guardrail::Guardrail;
use crate::agent::handoff::HandoffConfig;
use crate::api::provider::{ModelSettings, ToolChoice};
use crate::tools::core::{Tool, ToolSet};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Turn budget used when neither the agent nor the run config sets one.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// A named bundle of instructions, tools, handoff targets and guardrails.
///
/// Agents are read-only during a run and shared as `Arc<Agent>`. A handoff
/// replaces the active agent reference; it never mutates an agent.
///
/// ```ignore
/// let agent = Agent::new("support", "Answer support questions.")
///     .with_model("gpt-4o-mini")
///     .with_tool(order_status_tool())
///     .with_handoff(HandoffConfig::new("billing"))
///     .with_max_turns(6);
/// ```
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub settings: ModelSettings,
    pub tools: ToolSet,
    pub handoffs: Vec<HandoffConfig>,
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    pub max_turns: u32,
    /// JSON Schema for structured final output.
    pub response_format: Option<Value>,
    /// Clear a forced `tool_choice` once any tool (or handoff) has been used,
    /// so the next request does not force the same tool again.
    pub reset_tool_choice: bool,
    pub computer: Option<Arc<dyn ComputerExecutor>>,
    pub shell: Option<Arc<dyn ShellExecutor>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: DEFAULT_MODEL.to_string(),
            settings: ModelSettings::default(),
            tools: ToolSet::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
            response_format: None,
            reset_tool_choice: true,
            computer: None,
            shell: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.settings.tool_choice = Some(choice);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_handoff(mut self, handoff: HandoffConfig) -> Self {
        self.handoffs.push(handoff);
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

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_response_format(mut self, schema: Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    pub fn with_reset_tool_choice(mut self, reset: bool) -> Self {
        self.reset_tool_choice = reset;
        self
    }

    pub fn with_computer(mut self, executor: impl ComputerExecutor + 'static) -> Self {
        self.computer = Some(Arc::new(executor));
        self
    }

    pub fn with_shell(mut self, executor: impl ShellExecutor + 'static) -> Self {
        self.shell = Some(Arc::new(executor));
        self
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field(
                "handoffs",
                &self
                    .handoffs
                    .iter()
                    .map(|h| h.target_agent.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

// ── AgentRegistry ──────────────────────────────────────────────────

/// Agents addressable as handoff targets, keyed by name.
///
/// Handoffs name their target instead of holding it, so agents that hand
/// off to each other never form reference cycles.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any agent with the same name.
    pub fn register(&mut self, agent: Arc<Agent>) {
        self.agents.insert(agent.name.clone(), agent);
    }

    /// Register an agent (builder pattern).
    pub fn with(mut self, agent: Agent) -> Self {
        self.register(Arc::new(agent));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
