//! Tool Executor: resolves, invokes and records one turn's function calls.
//!
//! The batch never fails. Every call, successful or not, appends exactly one
//! `FunctionCallOutput` correlated by call id, in call order. Failures
//! (unparseable arguments, unknown or disabled tools, schema violations,
//! timeouts, tool errors, panics) become `"Tool execution failed: ..."`
//! outputs the model can react to.

use crate::ConversationItem;
use crate::agent::context::RunContext;
use crate::agent::config::ToolExecutionConfig;
use crate::agent::events::{EventKind, EventSink};
use crate::agent::response::ToolCallRequest;
use crate::error::ToolError;
use crate::tools::core::{ToolOutput, ToolSet, log_tool_call, truncate_result, validate_tool_arguments};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

// ── Wrapper ───────────────────────────────────────────────────────

/// A call as it is about to be invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Intercepts every function call the executor makes.
///
/// `before` may rewrite the tool name or the arguments; `after` may inspect
/// or replace the result. Both default to no-ops. The result is always
/// recorded under the call id the model issued, whatever `before` does to
/// `call_id`.
///
/// ```ignore
/// struct Redact;
///
/// impl ToolWrapper for Redact {
///     fn after(&self, _call: &ToolInvocation, result: &mut Result<ToolOutput, ToolError>) {
///         if let Ok(out) = result {
///             *out = ToolOutput::text(out.to_text().replace("secret", "***"));
///         }
///     }
/// }
/// ```
pub trait ToolWrapper: Send + Sync {
    fn before(&self, invocation: &mut ToolInvocation) {
        let _ = invocation;
    }

    fn after(&self, invocation: &ToolInvocation, result: &mut Result<ToolOutput, ToolError>) {
        let _ = (invocation, result);
    }
}

// ── Outcome ───────────────────────────────────────────────────────

/// Summary of one executed batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolBatchOutcome {
    pub executed: usize,
    pub failed: usize,
    /// Set when a call returned [`ToolOutput::Final`]; the first one in call
    /// order wins.
    pub final_output: Option<Value>,
}

impl ToolBatchOutcome {
    /// Whether the runner should ask the model for another turn.
    pub fn should_continue(&self) -> bool {
        self.final_output.is_none()
    }

    /// Fold another batch into this one, keeping the earlier final output.
    pub fn merge(&mut self, other: ToolBatchOutcome) {
        self.executed += other.executed;
        self.failed += other.failed;
        if self.final_output.is_none() {
            self.final_output = other.final_output;
        }
    }

    fn record(&mut self, recorded: &RecordedCall) {
        self.executed += 1;
        if recorded.failed {
            self.failed += 1;
        }
        if self.final_output.is_none() {
            self.final_output = recorded.final_output.clone();
        }
    }
}

/// One call's contribution to the conversation.
pub(crate) struct RecordedCall {
    pub item: ConversationItem,
    pub failed: bool,
    pub final_output: Option<Value>,
}

/// Turn a call result into its output item and emit the matching event.
pub(crate) fn record_result(
    call_id: &str,
    name: &str,
    result: Result<ToolOutput, ToolError>,
    max_result_bytes: usize,
    sink: &EventSink,
) -> RecordedCall {
    match result {
        Ok(output) => {
            let text = truncate_result(output.to_text(), max_result_bytes);
            sink.emit(EventKind::ToolExecutionComplete {
                call_id: call_id.to_string(),
                name: name.to_string(),
                output: text.clone(),
            });
            RecordedCall {
                item: ConversationItem::function_output(call_id, text),
                failed: false,
                final_output: match output {
                    ToolOutput::Final(value) => Some(value),
                    ToolOutput::Content(_) => None,
                },
            }
        }
        Err(e) => {
            warn!("Tool {name} ({call_id}) failed: {e}");
            sink.emit(EventKind::ToolExecutionError {
                call_id: call_id.to_string(),
                name: name.to_string(),
                error: e.to_string(),
            });
            RecordedCall {
                item: ConversationItem::function_output(call_id, format!("Tool execution failed: {e}")),
                failed: true,
                final_output: None,
            }
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

// ── Execution ─────────────────────────────────────────────────────

/// Parse raw call arguments. An empty payload means "no arguments".
pub fn parse_call_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| {
        ToolError::InvalidArguments(format!("could not parse arguments as JSON ({e})"))
    })
}

/// Execute `calls` and append one output item per call to `conversation`.
///
/// With `config.parallel` the calls of the batch run concurrently; outputs
/// are still appended in call order.
pub async fn execute_tool_calls(
    calls: &[ToolCallRequest],
    conversation: &mut Vec<ConversationItem>,
    tools: &ToolSet,
    ctx: &RunContext,
    config: &ToolExecutionConfig,
    wrapper: Option<&dyn ToolWrapper>,
    sink: &EventSink,
) -> ToolBatchOutcome {
    let recorded: Vec<RecordedCall> = if config.parallel && calls.len() > 1 {
        futures::future::join_all(
            calls
                .iter()
                .map(|call| execute_one(call, tools, ctx, config, wrapper, sink)),
        )
        .await
    } else {
        let mut recorded = Vec::with_capacity(calls.len());
        for call in calls {
            recorded.push(execute_one(call, tools, ctx, config, wrapper, sink).await);
        }
        recorded
    };

    let mut outcome = ToolBatchOutcome::default();
    for call in recorded {
        outcome.record(&call);
        conversation.push(call.item);
    }
    debug!(
        "Executed {} tool call(s), {} failed",
        outcome.executed, outcome.failed
    );
    outcome
}

async fn execute_one(
    call: &ToolCallRequest,
    tools: &ToolSet,
    ctx: &RunContext,
    config: &ToolExecutionConfig,
    wrapper: Option<&dyn ToolWrapper>,
    sink: &EventSink,
) -> RecordedCall {
    sink.emit(EventKind::ToolExecutionStart {
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    });

    let arguments = match parse_call_arguments(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            return record_result(&call.call_id, &call.name, Err(e), config.max_result_bytes, sink);
        }
    };

    let mut invocation = ToolInvocation {
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        arguments,
    };
    if let Some(w) = wrapper {
        w.before(&mut invocation);
    }

    let mut result = invoke(&invocation, tools, ctx, config).await;

    if let Some(w) = wrapper {
        w.after(&invocation, &mut result);
    }
    record_result(
        &call.call_id,
        &invocation.name,
        result,
        config.max_result_bytes,
        sink,
    )
}

async fn invoke(
    invocation: &ToolInvocation,
    tools: &ToolSet,
    ctx: &RunContext,
    config: &ToolExecutionConfig,
) -> Result<ToolOutput, ToolError> {
    let name = invocation.name.as_str();
    let tool = tools.resolve(name, ctx)?;
    if config.validate_arguments {
        validate_tool_arguments(&tool.definition(), &invocation.arguments)?;
    }

    log_tool_call(name, &invocation.arguments.to_string());
    let start = Instant::now();

    let future = AssertUnwindSafe(tool.execute(invocation.arguments.clone(), ctx)).catch_unwind();
    let caught = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(caught) => caught,
            Err(_) => {
                return Err(ToolError::Timeout {
                    name: name.to_string(),
                    seconds: limit.as_secs_f64(),
                });
            }
        },
        None => future.await,
    };

    debug!(
        "Tool {name} completed in {:.0}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    caught.unwrap_or_else(|payload| Err(ToolError::Execution(panic_message(payload))))
}

// ── Termination markers ───────────────────────────────────────────

const TERMINATION_MARKERS: &[&str] = &["stop", "terminate", "done", "finished"];
const NEGATIONS: &[&str] = &["not", "never", "don't", "dont", "doesn't", "can't", "cannot", "won't"];

/// Whether a message should prompt another turn.
///
/// Tool calls always continue. Otherwise the text is scanned for whole-word,
/// case-insensitive termination markers; a marker directly after a negation
/// ("not stop") does not count. Empty text does not continue.
pub fn should_continue(text: &str, has_tool_calls: bool) -> bool {
    if has_tool_calls {
        return true;
    }
    if text.trim().is_empty() {
        return false;
    }
    let normalized = text.replace('\u{2019}', "'").to_lowercase();
    let tokens: Vec<&str> = normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .collect();

    let terminated = tokens.iter().enumerate().any(|(i, token)| {
        TERMINATION_MARKERS.contains(token)
            && !(i > 0 && NEGATIONS.contains(&tokens[i - 1]))
    });
    !terminated
}
