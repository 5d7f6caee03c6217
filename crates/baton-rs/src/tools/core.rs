//! Tool abstraction for function-calling agents.
//!
//! The [`Tool`] trait defines the interface every tool implements: a static
//! API definition (name, description, JSON schema), an enablement predicate,
//! and an async `execute` method. Tools are collected into a [`ToolSet`],
//! the name-keyed registry the tool executor resolves calls against.

use crate::ToolDef;
use crate::agent::context::RunContext;
use crate::error::ToolError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

// ── ToolOutput ─────────────────────────────────────────────────────

/// What a tool produced.
///
/// `Final` marks completion: the step processor stops the run and uses the
/// value as the final output instead of asking the model for another turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Content(Value),
    Final(Value),
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Content(Value::String(s.into()))
    }

    pub fn final_output(value: impl Into<Value>) -> Self {
        Self::Final(value.into())
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Content(v) | Self::Final(v) => v,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// Render for the conversation: strings verbatim, everything else as JSON.
    pub fn to_text(&self) -> String {
        match self.value() {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<Value> for ToolOutput {
    fn from(v: Value) -> Self {
        Self::Content(v)
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that an agent can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct OrderStatus { db: Arc<Db> }
///
/// impl Tool for OrderStatus {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute<'a>(&'a self, arguments: Value, _ctx: &'a RunContext) -> ToolFuture<'a> {
///         Box::pin(async move {
///             let id = parse_string_arg(&arguments, "order_id")
///                 .ok_or_else(|| ToolError::InvalidArguments("order_id is required".into()))?;
///             Ok(ToolOutput::text(self.db.status(&id).await))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the provider.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with already-parsed JSON arguments.
    ///
    /// Errors are recovered by the tool executor and shown to the model as a
    /// tool result; they never abort the run.
    fn execute<'a>(&'a self, arguments: Value, ctx: &'a RunContext) -> ToolFuture<'a>;

    /// The tool's name (delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Whether the tool is available for the current run state. Disabled
    /// tools are hidden from the provider and refused if called anyway.
    fn is_enabled(&self, ctx: &RunContext) -> bool {
        let _ = ctx;
        true
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// An ordered collection of tools that can be resolved by name.
///
/// Registration order is preserved for [`definitions`](Self::definitions);
/// re-registering a name replaces the earlier tool in place.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with(OrderStatus::new(db.clone()))
///     .with_if(refunds_enabled, IssueRefund::new(db));
/// let defs = tools.definitions();
/// ```
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        match self.index.get(&name) {
            Some(&pos) => self.tools[pos] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    /// Look up a tool by name and check it is enabled for this run.
    pub fn resolve(&self, name: &str, ctx: &RunContext) -> Result<Arc<dyn Tool>, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if !tool.is_enabled(ctx) {
            return Err(ToolError::Disabled {
                name: name.to_string(),
                reason: "not available in the current context".into(),
            });
        }
        Ok(Arc::clone(tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Definitions of the tools enabled for `ctx`, in registration order.
    pub fn enabled_definitions(&self, ctx: &RunContext) -> Vec<ToolDef> {
        self.tools
            .iter()
            .filter(|t| t.is_enabled(ctx))
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ── DisabledTool ───────────────────────────────────────────────────

/// A tool the model can still see but that always refuses to run.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_if(refunds, IssueRefund::new(db))
///     .with_if(!refunds, DisabledTool::new(refund_def(), "Refunds are paused."));
/// ```
pub struct DisabledTool {
    def: ToolDef,
    reason: String,
}

impl DisabledTool {
    pub fn new(def: ToolDef, reason: impl Into<String>) -> Self {
        Self {
            def,
            reason: reason.into(),
        }
    }

    /// Create a disabled variant of an existing tool.
    pub fn from_tool(tool: &dyn Tool, reason: impl Into<String>) -> Self {
        Self::new(tool.definition(), reason)
    }
}

impl Tool for DisabledTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute<'a>(&'a self, _arguments: Value, _ctx: &'a RunContext) -> ToolFuture<'a> {
        let err = ToolError::Disabled {
            name: self.def.function.name.clone(),
            reason: self.reason.clone(),
        };
        Box::pin(async move { Err(err) })
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(Value, RunContext) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// Enablement predicate for [`FnTool`].
type EnabledPredicate = Box<dyn Fn(&RunContext) -> bool + Send + Sync>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Use [`FnTool`] for stateless tools. For tools that hold shared state,
/// define a struct and implement [`Tool`] directly.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct WeatherArgs {
///     /// City to look up.
///     city: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("weather", "Current weather for a city", json_schema_for::<WeatherArgs>()),
///     |args: WeatherArgs, _ctx| async move {
///         Ok::<_, String>(format!("Sunny in {}", args.city))
///     },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    enabled: Option<EnabledPredicate>,
}

impl FnTool {
    /// Create a new closure-based tool.
    ///
    /// The handler receives arguments of type `A` (deserialized from the
    /// parsed JSON) plus the run context. A deserialization failure becomes
    /// [`ToolError::InvalidArguments`]; a handler `Err` becomes
    /// [`ToolError::Execution`].
    pub fn new<A, F, Fut, O, E>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
        E: fmt::Display + 'static,
    {
        let erased = move |raw: Value,
                           ctx: RunContext|
              -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>> {
            let args: A = match serde_json::from_value(raw) {
                Ok(a) => a,
                Err(e) => {
                    return Box::pin(async move { Err(ToolError::InvalidArguments(e.to_string())) });
                }
            };
            let fut = handler(args, ctx);
            Box::pin(async move {
                fut.await
                    .map(Into::into)
                    .map_err(|e| ToolError::Execution(e.to_string()))
            })
        };

        Self {
            def,
            handler: Box::new(erased),
            enabled: None,
        }
    }

    /// Only expose this tool when `predicate` holds for the run context.
    pub fn enabled_when(
        mut self,
        predicate: impl Fn(&RunContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.enabled = Some(Box::new(predicate));
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: &'a RunContext) -> ToolFuture<'a> {
        (self.handler)(arguments, ctx.clone())
    }

    fn is_enabled(&self, ctx: &RunContext) -> bool {
        self.enabled.as_ref().is_none_or(|p| p(ctx))
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .field("conditional", &self.enabled.is_some())
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against a declared JSON Schema.
///
/// A schema that does not compile is skipped rather than blocking the call.
pub fn validate_tool_arguments(def: &ToolDef, arguments: &Value) -> Result<(), ToolError> {
    let validator = match jsonschema::validator_for(&def.function.parameters) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "argument validation failed for tool '{}': {}",
            def.function.name,
            errors.join("; ")
        )))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes (on a char boundary), appending
/// a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let total = s.len();
    let mut out = s;
    out.truncate(cut);
    out.push_str(&format!("...\n[truncated: {total} bytes total]"));
    out
}

/// Parse JSON arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments.clone()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Extract a string value from tool-call arguments JSON.
pub fn parse_string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an integer value from tool-call arguments JSON.
pub fn parse_int_arg(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}
