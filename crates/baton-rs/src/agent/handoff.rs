//! Agent switching with bounded-chain cycle detection.
//!
//! A handoff is requested by the model calling a handoff tool (one
//! [`HandoffTool`] per [`HandoffConfig`] on the active agent). The tool
//! records a pending target in the run's [`HandoffContext`];
//! [`HandoffContext::execute_handoff`] then validates it against the chain of
//! the last [`MAX_HANDOFF_CHAIN`] transfers and switches the current agent.

use crate::ToolDef;
use crate::agent::context::RunContext;
use crate::agent::definition::{Agent, AgentRegistry};
use crate::error::{HandoffError, ToolError};
use crate::tools::core::{Tool, ToolFuture, ToolOutput};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of `(from, to)` transfers remembered for cycle detection.
pub const MAX_HANDOFF_CHAIN: usize = 10;

// ── HandoffContext ─────────────────────────────────────────────────

/// One recorded transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffLink {
    pub from: String,
    pub to: String,
}

impl HandoffLink {
    fn touches(&self, agent: &str) -> bool {
        self.from == agent || self.to == agent
    }
}

/// Result of a successful [`HandoffContext::execute_handoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffOutcome {
    pub previous_agent: Option<String>,
    pub current_agent: String,
    /// Snapshot of the data transferred with this handoff.
    pub handoff_data: Value,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Handoff state of one run.
#[derive(Debug, Clone, Default)]
pub struct HandoffContext {
    current_agent: Option<String>,
    target_agent: Option<String>,
    handoff_data: Value,
    handoff_reason: Option<String>,
    shared_context: Map<String, Value>,
    handoff_chain: VecDeque<HandoffLink>,
    handoff_timestamp: Option<DateTime<Utc>>,
}

impl HandoffContext {
    pub fn new(current_agent: impl Into<String>) -> Self {
        Self {
            current_agent: Some(current_agent.into()),
            ..Self::default()
        }
    }

    pub fn set_current_agent(&mut self, agent: impl Into<String>) {
        self.current_agent = Some(agent.into());
    }

    /// Record a pending handoff. `data` is copied, so later changes to the
    /// caller's value are not observed.
    pub fn set_handoff(&mut self, target: impl Into<String>, data: &Value, reason: Option<&str>) {
        self.target_agent = Some(target.into());
        self.handoff_data = data.clone();
        self.handoff_reason = reason.map(str::to_string);
    }

    /// Switch to the pending target.
    ///
    /// Fails with [`HandoffError::NoTarget`] when nothing is pending and with
    /// [`HandoffError::Circular`] when the target already appears on either
    /// side of a recorded transfer.
    pub fn execute_handoff(&mut self) -> Result<HandoffOutcome, HandoffError> {
        let target = self.target_agent.clone().ok_or(HandoffError::NoTarget)?;
        if self.handoff_chain.iter().any(|link| link.touches(&target)) {
            return Err(HandoffError::Circular { agent: target });
        }

        let previous = self.current_agent.replace(target.clone());
        if self.handoff_chain.len() >= MAX_HANDOFF_CHAIN {
            self.handoff_chain.pop_front();
        }
        self.handoff_chain.push_back(HandoffLink {
            from: previous.clone().unwrap_or_default(),
            to: target.clone(),
        });

        if let Value::Object(fields) = &self.handoff_data {
            for (k, v) in fields {
                self.shared_context.insert(k.clone(), v.clone());
            }
        }

        self.target_agent = None;
        let timestamp = Utc::now();
        self.handoff_timestamp = Some(timestamp);

        Ok(HandoffOutcome {
            previous_agent: previous,
            current_agent: target,
            handoff_data: self.handoff_data.clone(),
            reason: self.handoff_reason.clone(),
            timestamp,
        })
    }

    pub fn handoff_pending(&self) -> bool {
        self.target_agent.is_some()
    }

    /// Drop any pending handoff, its data and the recorded chain. The current
    /// agent and shared context are kept.
    pub fn clear_handoff(&mut self) {
        self.target_agent = None;
        self.handoff_data = Value::Null;
        self.handoff_reason = None;
        self.handoff_chain.clear();
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    pub fn target_agent(&self) -> Option<&str> {
        self.target_agent.as_deref()
    }

    pub fn handoff_data(&self) -> &Value {
        &self.handoff_data
    }

    pub fn shared_context(&self) -> &Map<String, Value> {
        &self.shared_context
    }

    pub fn chain(&self) -> &VecDeque<HandoffLink> {
        &self.handoff_chain
    }

    pub fn handoff_timestamp(&self) -> Option<DateTime<Utc>> {
        self.handoff_timestamp
    }
}

// ── HandoffConfig ──────────────────────────────────────────────────

/// Predicate deciding whether a handoff may happen.
pub type HandoffCondition = Arc<dyn Fn(&RunContext) -> bool + Send + Sync>;

/// Callback run after a successful handoff, chosen explicitly at
/// registration time.
#[derive(Clone)]
pub enum HandoffCallback {
    ContextOnly(Arc<dyn Fn(&RunContext) + Send + Sync>),
    /// Also receives the data the model passed with the handoff.
    ContextAndInput(Arc<dyn Fn(&RunContext, &Value) + Send + Sync>),
}

impl HandoffCallback {
    pub fn context_only(f: impl Fn(&RunContext) + Send + Sync + 'static) -> Self {
        Self::ContextOnly(Arc::new(f))
    }

    pub fn context_and_input(f: impl Fn(&RunContext, &Value) + Send + Sync + 'static) -> Self {
        Self::ContextAndInput(Arc::new(f))
    }

    fn invoke(&self, ctx: &RunContext, data: &Value) {
        match self {
            Self::ContextOnly(f) => f(ctx),
            Self::ContextAndInput(f) => f(ctx, data),
        }
    }
}

impl fmt::Debug for HandoffCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextOnly(_) => f.write_str("ContextOnly(..)"),
            Self::ContextAndInput(_) => f.write_str("ContextAndInput(..)"),
        }
    }
}

/// One handoff target of an agent.
///
/// ```ignore
/// let config = HandoffConfig::new("billing")
///     .with_description("Billing disputes and refunds")
///     .with_field("invoice_id", "Invoice the user is asking about")
///     .with_condition(|ctx| ctx.get("verified").is_some())
///     .on_handoff(HandoffCallback::context_and_input(|ctx, data| {
///         ctx.set("last_invoice", data["invoice_id"].clone());
///     }));
/// ```
#[derive(Clone, Default)]
pub struct HandoffConfig {
    pub target_agent: String,
    /// Overrides the default `transfer_to_<target>` tool name.
    pub tool_name: Option<String>,
    pub description: Option<String>,
    /// Field name to description. Becomes the handoff tool's parameter schema.
    pub data_contract: BTreeMap<String, String>,
    pub condition: Option<HandoffCondition>,
    pub on_handoff: Option<HandoffCallback>,
}

impl HandoffConfig {
    pub fn new(target_agent: impl Into<String>) -> Self {
        Self {
            target_agent: target_agent.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a field to the data contract.
    pub fn with_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.data_contract.insert(name.into(), description.into());
        self
    }

    pub fn with_condition(
        mut self,
        condition: impl Fn(&RunContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn on_handoff(mut self, callback: HandoffCallback) -> Self {
        self.on_handoff = Some(callback);
        self
    }

    /// Name of the tool the model calls to trigger this handoff.
    pub fn tool_name(&self) -> String {
        self.tool_name
            .clone()
            .unwrap_or_else(|| format!("transfer_to_{}", snake_case(&self.target_agent)))
    }

    fn validate(&self) -> Result<(), HandoffError> {
        if self.target_agent.trim().is_empty() {
            return Err(HandoffError::InvalidConfig(
                "target_agent must not be blank".into(),
            ));
        }
        if let Some(name) = &self.tool_name
            && name.trim().is_empty()
        {
            return Err(HandoffError::InvalidConfig(format!(
                "tool name for '{}' must not be blank",
                self.target_agent
            )));
        }
        if let Some(field) = self.data_contract.keys().find(|k| k.trim().is_empty()) {
            return Err(HandoffError::InvalidConfig(format!(
                "data contract for '{}' has a blank field name {field:?}",
                self.target_agent
            )));
        }
        Ok(())
    }

    fn parameters(&self) -> Value {
        let mut properties = Map::new();
        for (field, description) in &self.data_contract {
            properties.insert(field.clone(), json!({ "description": description }));
        }
        properties
            .entry("reason")
            .or_insert_with(|| json!({"type": "string", "description": "Why control is being transferred."}));
        json!({ "type": "object", "properties": properties })
    }
}

impl fmt::Debug for HandoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffConfig")
            .field("target_agent", &self.target_agent)
            .field("tool_name", &self.tool_name())
            .field("data_contract", &self.data_contract)
            .field("conditional", &self.condition.is_some())
            .field("on_handoff", &self.on_handoff)
            .finish()
    }
}

// ── HandoffTool ────────────────────────────────────────────────────

/// The invocable built from a [`HandoffConfig`].
#[derive(Debug, Clone)]
pub struct HandoffTool {
    config: HandoffConfig,
    name: String,
}

impl HandoffTool {
    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    pub fn tool_name(&self) -> &str {
        &self.name
    }

    pub fn target_agent(&self) -> &str {
        &self.config.target_agent
    }

    /// Check the condition and record the pending handoff.
    pub fn request(&self, data: &Value, ctx: &RunContext) -> Result<(), HandoffError> {
        if let Some(condition) = &self.config.condition
            && !condition(ctx)
        {
            return Err(HandoffError::ConditionNotMet {
                target: self.config.target_agent.clone(),
            });
        }
        let reason = data.get("reason").and_then(Value::as_str);
        ctx.with_handoff(|h| h.set_handoff(&self.config.target_agent, data, reason));
        Ok(())
    }

    /// Resolve the target, switch the current agent and run the callback.
    pub fn transfer(
        &self,
        data: &Value,
        ctx: &RunContext,
        registry: &AgentRegistry,
    ) -> Result<(Arc<Agent>, HandoffOutcome), HandoffError> {
        let target = &self.config.target_agent;
        let agent = registry
            .get(target)
            .ok_or_else(|| HandoffError::UnknownAgent(target.clone()))?;

        self.request(data, ctx)?;
        let outcome = ctx.with_handoff(|h| h.execute_handoff())?;
        info!(
            "Handoff: {} -> {} (trace_id={})",
            outcome.previous_agent.as_deref().unwrap_or("-"),
            outcome.current_agent,
            ctx.trace_id()
        );

        if let Some(callback) = &self.config.on_handoff {
            debug!("Running on_handoff callback for {target}");
            callback.invoke(ctx, &outcome.handoff_data);
        }
        Ok((agent, outcome))
    }
}

impl Tool for HandoffTool {
    fn definition(&self) -> ToolDef {
        let description = self.config.description.clone().unwrap_or_else(|| {
            format!(
                "Hand off the conversation to the '{}' agent.",
                self.config.target_agent
            )
        });
        ToolDef::new(&self.name, description, self.config.parameters())
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: &'a RunContext) -> ToolFuture<'a> {
        Box::pin(async move {
            self.request(&arguments, ctx)
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            Ok(ToolOutput::Content(
                json!({ "assistant": self.config.target_agent }),
            ))
        })
    }

    /// Hidden from the provider while the handoff condition does not hold.
    fn is_enabled(&self, ctx: &RunContext) -> bool {
        self.config.condition.as_ref().is_none_or(|condition| condition(ctx))
    }
}

/// Build one handoff tool per config entry.
///
/// Fails fast on a blank target, blank field name, or two entries that would
/// produce the same tool name.
pub fn add_handoff_tools(configs: &[HandoffConfig]) -> Result<Vec<HandoffTool>, HandoffError> {
    let mut seen = HashSet::new();
    let mut tools = Vec::with_capacity(configs.len());
    for config in configs {
        config.validate()?;
        let name = config.tool_name();
        if !seen.insert(name.clone()) {
            return Err(HandoffError::InvalidConfig(format!(
                "duplicate handoff tool name '{name}'"
            )));
        }
        tools.push(HandoffTool {
            config: config.clone(),
            name,
        });
    }
    Ok(tools)
}

/// `"Billing Agent"` / `"BillingAgent"` -> `"billing_agent"`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower_or_digit = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower_or_digit = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
