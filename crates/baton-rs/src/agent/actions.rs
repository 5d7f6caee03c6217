//! Computer and shell actions.
//!
//! Some providers emit dedicated `computer_call` / `shell_call` items instead
//! of function calls. An agent handles them through optional
//! [`ComputerExecutor`] and [`ShellExecutor`] capabilities; without one, each
//! call gets a recovered `"Tool execution failed: ..."` output like any
//! other failed tool.

use crate::ConversationItem;
use crate::agent::context::RunContext;
use crate::agent::definition::Agent;
use crate::agent::events::{EventKind, EventSink};
use crate::agent::execution::{ToolBatchOutcome, panic_message, record_result};
use crate::error::ToolError;
use crate::tools::core::ToolOutput;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by action executors.
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// A `computer_call` item awaiting execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputerActionRequest {
    pub call_id: String,
    /// Vendor action payload (`{"type": "click", "x": .., "y": ..}` etc.).
    pub action: Value,
}

/// A `shell_call` item awaiting execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellRequest {
    pub call_id: String,
    pub command: String,
    pub working_directory: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Performs computer-use actions (screenshots, clicks, typing).
pub trait ComputerExecutor: Send + Sync {
    fn execute<'a>(&'a self, action: &'a Value, ctx: &'a RunContext) -> ActionFuture<'a>;
}

/// Runs shell commands on behalf of the model.
pub trait ShellExecutor: Send + Sync {
    fn run<'a>(&'a self, request: &'a ShellRequest, ctx: &'a RunContext) -> ActionFuture<'a>;
}

const COMPUTER: &str = "computer";
const SHELL: &str = "shell";

/// Execute computer actions in order, appending one output per action.
pub async fn execute_computer_actions(
    requests: &[ComputerActionRequest],
    conversation: &mut Vec<ConversationItem>,
    agent: &Agent,
    ctx: &RunContext,
    max_result_bytes: usize,
    sink: &EventSink,
) -> ToolBatchOutcome {
    let mut outcome = ToolBatchOutcome::default();
    for request in requests {
        sink.emit(EventKind::ToolExecutionStart {
            call_id: request.call_id.clone(),
            name: COMPUTER.to_string(),
            arguments: request.action.to_string(),
        });
        let result = match &agent.computer {
            Some(executor) => {
                AssertUnwindSafe(executor.execute(&request.action, ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ToolError::Execution(panic_message(payload))))
            }
            None => Err(ToolError::NotFound(format!(
                "{COMPUTER} (agent '{}' has no computer executor)",
                agent.name
            ))),
        };
        let recorded = record_result(&request.call_id, COMPUTER, result, max_result_bytes, sink);
        outcome.merge(ToolBatchOutcome {
            executed: 1,
            failed: usize::from(recorded.failed),
            final_output: recorded.final_output,
        });
        conversation.push(recorded.item);
    }
    outcome
}

/// Execute shell calls in order, honoring each call's `timeout_ms`.
pub async fn execute_shell_calls(
    requests: &[ShellRequest],
    conversation: &mut Vec<ConversationItem>,
    agent: &Agent,
    ctx: &RunContext,
    max_result_bytes: usize,
    sink: &EventSink,
) -> ToolBatchOutcome {
    let mut outcome = ToolBatchOutcome::default();
    for request in requests {
        sink.emit(EventKind::ToolExecutionStart {
            call_id: request.call_id.clone(),
            name: SHELL.to_string(),
            arguments: request.command.clone(),
        });
        let result = match &agent.shell {
            Some(executor) => run_shell(executor.as_ref(), request, ctx).await,
            None => Err(ToolError::NotFound(format!(
                "{SHELL} (agent '{}' has no shell executor)",
                agent.name
            ))),
        };
        let recorded = record_result(&request.call_id, SHELL, result, max_result_bytes, sink);
        outcome.merge(ToolBatchOutcome {
            executed: 1,
            failed: usize::from(recorded.failed),
            final_output: recorded.final_output,
        });
        conversation.push(recorded.item);
    }
    outcome
}

async fn run_shell(
    executor: &dyn ShellExecutor,
    request: &ShellRequest,
    ctx: &RunContext,
) -> Result<ToolOutput, ToolError> {
    let future = AssertUnwindSafe(executor.run(request, ctx)).catch_unwind();
    let caught = match request.timeout_ms {
        Some(ms) => {
            let limit = Duration::from_millis(ms);
            match tokio::time::timeout(limit, future).await {
                Ok(caught) => caught,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        name: SHELL.to_string(),
                        seconds: limit.as_secs_f64(),
                    });
                }
            }
        }
        None => future.await,
    };
    caught.unwrap_or_else(|payload| Err(ToolError::Execution(panic_message(payload))))
}
