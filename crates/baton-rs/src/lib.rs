//! Multi-agent turn execution runtime.
//!
//! `baton-rs` drives a multi-turn conversation between a caller, a language
//! model [`Provider`](api::provider::Provider) and a set of invocable
//! [`Tool`](tools::core::Tool)s, switching the active
//! [`Agent`](agent::definition::Agent) mid-conversation through explicit
//! handoffs. The core abstraction is the [`Runner`](agent::runner::Runner): a
//! loop that requests a model response, canonicalizes it, runs tools or hands
//! off, continues truncated output, and repeats until a final output is
//! produced or the turn budget runs out.
//!
//! # Getting started
//!
//! ```ignore
//! use baton_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RunError> {
//!     let provider = Arc::new(MyProvider::new());
//!
//!     let billing = Agent::new("billing", "You resolve billing questions.");
//!     let triage = Agent::new("triage", "Route the user to the right team.")
//!         .with_handoff(HandoffConfig::new("billing").with_field("invoice_id", "Invoice in question"));
//!
//!     let runner = Runner::new(provider)
//!         .with_agent(billing)
//!         .with_event_handler(LoggingHandler);
//!
//!     let result = runner
//!         .run(&Arc::new(triage), &[ConversationItem::user("My invoice is wrong.")])
//!         .await?;
//!
//!     println!("{} answered: {}", result.last_agent.name, result.final_output);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Define tools:** the [`Tool`](tools::core::Tool) trait,
//!   [`ToolSet`](tools::core::ToolSet) for name-keyed registration, and
//!   [`FnTool`](tools::core::FnTool) for closure-based tools with typed
//!   arguments.
//! - **Configure agents and runs:** [`Agent`](agent::definition::Agent),
//!   [`RunConfig`](agent::config::RunConfig) and
//!   [`HandoffConfig`](agent::handoff::HandoffConfig).
//! - **Observe a run:** implement [`EventHandler`](agent::events::EventHandler)
//!   or a [`LifecycleHook`](agent::hooks::LifecycleHook), or consume a
//!   [`StreamedRun`](agent::stream::StreamedRun).
//! - **Plug in a model vendor:** implement
//!   [`Provider`](api::provider::Provider); every vendor response is
//!   normalized into a [`ModelResponse`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Runner loop, step state machine, response processing, tool execution, handoffs, guardrails, sessions, events |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), [`FnTool`](tools::core::FnTool) |
//! | [`api`] | Provider seam, truncation continuation, retry with backoff, trace ids |
//! | [`error`] | Typed error taxonomy |

pub mod agent;
pub mod api;
pub mod error;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::ops::{Add, AddAssign};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default model name used when an agent does not set one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use baton_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     order_id: String,
///     #[serde(default)]
///     verbose: Option<bool>,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"order_id".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object", "properties": {}}))
}

// ── Conversation types ─────────────────────────────────────────────

/// The role of a conversation message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One entry of the canonical conversation.
///
/// The conversation is an append-only sequence of these items. Every vendor
/// response is normalized into this shape by the response processor before
/// the runner looks at it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: Role,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        /// Raw JSON arguments exactly as the model produced them.
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    HandoffCall {
        call_id: String,
        target_agent: String,
        data: Value,
    },
    ComputerAction {
        call_id: String,
        action: Value,
    },
    ShellCall {
        call_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

impl ConversationItem {
    pub fn system(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::FunctionCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Text content if this item is a message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Message role, if this item is a message.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Message { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Correlation id for call and call-output items.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Message { .. } => None,
            Self::FunctionCall { call_id, .. }
            | Self::FunctionCallOutput { call_id, .. }
            | Self::HandoffCall { call_id, .. }
            | Self::ComputerAction { call_id, .. }
            | Self::ShellCall { call_id, .. } => Some(call_id),
        }
    }

    /// Whether this item asks for something to be executed locally.
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Self::FunctionCall { .. }
                | Self::HandoffCall { .. }
                | Self::ComputerAction { .. }
                | Self::ShellCall { .. }
        )
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition handed to the provider (function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ── Response types ─────────────────────────────────────────────────

/// Token counters reported by a provider call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(mut self, rhs: Self) -> Usage {
        self += rhs;
        self
    }
}

/// Why the provider stopped generating.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    /// Output was cut short by a token limit.
    Length,
    ContentFilter,
    Incomplete,
    Error(String),
    Other(String),
}

impl FinishReason {
    /// Map a vendor finish/stop reason spelling onto the canonical variant.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" | "completed" | "complete" => Self::Stop,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "length" | "max_tokens" | "max_output_tokens" | "truncated" => Self::Length,
            "content_filter" | "safety" | "refusal" | "recitation" => Self::ContentFilter,
            "incomplete" | "pause_turn" => Self::Incomplete,
            "error" | "failed" => Self::Error(raw.to_string()),
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::Incomplete => "incomplete",
            Self::Error(_) => "error",
            Self::Other(s) => s,
        }
    }
}

/// The provider-agnostic response every vendor format is normalized into.
///
/// `output` stays loosely typed: elements carry a `type` discriminator
/// (`message`, `output_text`, `function_call`, `computer_call`,
/// `shell_call`, or anything else) and are canonicalized by
/// [`process_response`](agent::response::process_response).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    /// Opaque response id, present for stateful vendors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

impl ModelResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an assistant `message` output item.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        self.output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text.into()}],
        }));
        self
    }

    /// Append a `function_call` output item.
    pub fn with_function_call(
        mut self,
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.output.push(json!({
            "type": "function_call",
            "call_id": call_id.into(),
            "name": name.into(),
            "arguments": arguments.into(),
        }));
        if self.finish_reason == FinishReason::Stop {
            self.finish_reason = FinishReason::ToolCalls;
        }
        self
    }

    /// Append an arbitrary output item.
    pub fn with_item(mut self, item: Value) -> Self {
        self.output.push(item);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = finish_reason;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_item_serializes_with_type_tag() {
        let item = ConversationItem::function_call("call_1", "lookup", r#"{"id":1}"#);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "function_call");
        assert_eq!(value["call_id"], "call_1");

        let back: ConversationItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn shell_call_omits_empty_optionals() {
        let item = ConversationItem::ShellCall {
            call_id: "s1".into(),
            command: "ls".into(),
            working_directory: None,
            timeout_ms: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("working_directory").is_none());
        assert!(value.get("timeout_ms").is_none());
    }

    #[test]
    fn call_id_only_on_calls() {
        assert_eq!(ConversationItem::user("hi").call_id(), None);
        assert_eq!(
            ConversationItem::function_output("c9", "ok").call_id(),
            Some("c9")
        );
        assert!(!ConversationItem::function_output("c9", "ok").is_call());
        assert!(ConversationItem::function_call("c9", "x", "{}").is_call());
    }

    #[test]
    fn usage_accumulates() {
        let mut usage = Usage::new(10, 5);
        usage += Usage::new(3, 2);
        assert_eq!(usage, Usage::new(13, 7));
        assert_eq!(usage.total_tokens, 20);
        assert_eq!(Usage::new(1, 1) + Usage::new(1, 1), Usage::new(2, 2));
    }

    #[test]
    fn finish_reason_maps_vendor_spellings() {
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::parse("MAX_OUTPUT_TOKENS"), FinishReason::Length);
        assert_eq!(FinishReason::parse("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("safety"), FinishReason::ContentFilter);
        assert_eq!(FinishReason::parse("incomplete"), FinishReason::Incomplete);
        assert!(matches!(FinishReason::parse("error"), FinishReason::Error(_)));
        assert_eq!(
            FinishReason::parse("weird"),
            FinishReason::Other("weird".into())
        );
        assert!(FinishReason::Length.is_truncated());
        assert!(!FinishReason::Stop.is_truncated());
    }

    #[test]
    fn response_builder_marks_tool_calls() {
        let response = ModelResponse::new()
            .with_message("checking")
            .with_function_call("c1", "lookup", "{}");
        assert_eq!(response.output.len(), 2);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn json_schema_for_object() {
        #[derive(Deserialize, JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            query: String,
        }
        let schema = json_schema_for::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["query"].is_object());
    }
}
