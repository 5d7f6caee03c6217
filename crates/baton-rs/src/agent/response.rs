//! Canonicalization of provider output into typed conversation items.
//!
//! [`process_response`] walks a [`ModelResponse`]'s `output` list in order:
//!
//! - consecutive `message` / `output_text` items collapse into one assistant
//!   message (array content parts are concatenated in order);
//! - `function_call` items become handoff calls when their name matches a
//!   handoff tool, otherwise ordinary function calls;
//! - `computer_call` and `shell_call` items become actions;
//! - anything else is skipped.
//!
//! Keys are accepted in snake_case or camelCase, arguments as a JSON string
//! or an inline object.

use crate::agent::actions::{ComputerActionRequest, ShellRequest};
use crate::agent::definition::Agent;
use crate::agent::handoff::HandoffTool;
use crate::api::tracing::generate_trace_id;
use crate::tools::core::ToolSet;
use crate::{ConversationItem, ModelResponse, Role};
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

/// An ordinary function call awaiting execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// A function call that targets a handoff tool.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffRequest {
    pub call_id: String,
    pub tool_name: String,
    pub target_agent: String,
    pub data: Value,
}

/// A provider response split into what the step processor must act on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedResponse {
    /// Every canonical item, in output order.
    pub items: Vec<ConversationItem>,
    pub function_calls: Vec<ToolCallRequest>,
    pub handoffs: Vec<HandoffRequest>,
    pub computer_actions: Vec<ComputerActionRequest>,
    pub shell_calls: Vec<ShellRequest>,
}

impl ProcessedResponse {
    pub fn handoffs_detected(&self) -> bool {
        !self.handoffs.is_empty()
    }

    pub fn has_tools_or_actions_to_run(&self) -> bool {
        !self.function_calls.is_empty()
            || !self.computer_actions.is_empty()
            || !self.shell_calls.is_empty()
    }

    /// Whether anything at all was called this turn, handoffs included.
    pub fn tool_used(&self) -> bool {
        self.handoffs_detected() || self.has_tools_or_actions_to_run()
    }

    /// Text of the last assistant message, if any.
    pub fn final_text(&self) -> Option<&str> {
        self.items
            .iter()
            .rev()
            .find(|i| i.role() == Some(Role::Assistant))
            .and_then(ConversationItem::text)
    }
}

/// Canonicalize `response` for `agent`.
///
/// Never fails: unknown item types and malformed entries are skipped.
pub fn process_response(
    response: &ModelResponse,
    agent: &Agent,
    all_tools: &ToolSet,
    handoffs: &[HandoffTool],
) -> ProcessedResponse {
    let mut processed = ProcessedResponse::default();
    let mut text_run: Option<String> = None;
    // Calls without an id get one scoped to this response.
    let mut fallback_prefix: Option<String> = None;

    for (position, item) in response.output.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            trace!("Skipping non-object output item at {position}");
            continue;
        };
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();

        if matches!(kind, "message" | "output_text") {
            if let Some(text) = item_text(item) {
                text_run.get_or_insert_with(String::new).push_str(&text);
            }
            continue;
        }

        flush_text(&mut text_run, &mut processed);
        let call_id = string_field(obj, "call_id", "callId")
            .or_else(|| string_field(obj, "id", "id"))
            .unwrap_or_else(|| {
                let prefix = fallback_prefix
                    .get_or_insert_with(|| response.id.clone().unwrap_or_else(generate_trace_id));
                format!("{prefix}_call_{position}")
            });

        match kind {
            "function_call" => {
                let name = string_field(obj, "name", "name").unwrap_or_default();
                let arguments = arguments_field(obj);
                if let Some(handoff) = handoffs.iter().find(|h| h.tool_name() == name) {
                    let data = parse_handoff_data(&arguments);
                    processed.items.push(ConversationItem::HandoffCall {
                        call_id: call_id.clone(),
                        target_agent: handoff.target_agent().to_string(),
                        data: data.clone(),
                    });
                    processed.handoffs.push(HandoffRequest {
                        call_id,
                        tool_name: name,
                        target_agent: handoff.target_agent().to_string(),
                        data,
                    });
                } else {
                    if !all_tools.contains(&name) {
                        debug!("Agent {} called unregistered tool '{name}'", agent.name);
                    }
                    processed.items.push(ConversationItem::FunctionCall {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });
                    processed.function_calls.push(ToolCallRequest {
                        call_id,
                        name,
                        arguments,
                    });
                }
            }
            "computer_call" => {
                let action = obj.get("action").cloned().unwrap_or(Value::Null);
                processed.items.push(ConversationItem::ComputerAction {
                    call_id: call_id.clone(),
                    action: action.clone(),
                });
                processed
                    .computer_actions
                    .push(ComputerActionRequest { call_id, action });
            }
            "shell_call" | "local_shell_call" => {
                let request = shell_request(obj, call_id);
                processed.items.push(ConversationItem::ShellCall {
                    call_id: request.call_id.clone(),
                    command: request.command.clone(),
                    working_directory: request.working_directory.clone(),
                    timeout_ms: request.timeout_ms,
                });
                processed.shell_calls.push(request);
            }
            other => trace!("Skipping unrecognized output item type '{other}'"),
        }
    }
    flush_text(&mut text_run, &mut processed);
    processed
}

/// Text carried by a `message` / `output_text` item.
///
/// String content is returned as-is; array content has the `text` of each
/// part concatenated in order.
pub fn item_text(item: &Value) -> Option<String> {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    match item.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(p) => p.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            Some(text)
        }
        _ => None,
    }
}

fn flush_text(run: &mut Option<String>, processed: &mut ProcessedResponse) {
    if let Some(text) = run.take()
        && !text.is_empty()
    {
        processed.items.push(ConversationItem::assistant(text));
    }
}

fn string_field(obj: &Map<String, Value>, snake: &str, camel: &str) -> Option<String> {
    obj.get(snake)
        .or_else(|| obj.get(camel))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn u64_field(obj: &Map<String, Value>, snake: &str, camel: &str) -> Option<u64> {
    obj.get(snake).or_else(|| obj.get(camel)).and_then(Value::as_u64)
}

fn arguments_field(obj: &Map<String, Value>) -> String {
    match obj.get("arguments").or_else(|| obj.get("args")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_handoff_data(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({ "raw": arguments }))
}

fn shell_request(obj: &Map<String, Value>, call_id: String) -> ShellRequest {
    // Shell calls carry their fields either at top level or under `action`.
    let source = obj
        .get("action")
        .and_then(Value::as_object)
        .unwrap_or(obj);
    let command = match source.get("command") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    };
    ShellRequest {
        call_id,
        command,
        working_directory: string_field(source, "working_directory", "workingDirectory"),
        timeout_ms: u64_field(source, "timeout_ms", "timeoutMs"),
    }
}
