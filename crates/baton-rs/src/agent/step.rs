//! Step Processor: the per-turn state machine.
//!
//! Given one model response, [`process_step`] decides what happens next:
//!
//! 1. Canonicalize the response ([`process_response`]).
//! 2. A handoff call wins: the first one is executed and the verdict is
//!    [`NextStep::HandOff`]. Other calls in the same response are answered
//!    with "ignored" / "skipped" outputs so every call id stays paired.
//! 3. Otherwise function calls, computer actions and shell calls run. A tool
//!    returning [`ToolOutput::Final`](crate::tools::core::ToolOutput::Final)
//!    ends the run with [`NextStep::FinalOutput`]; anything else is
//!    [`NextStep::RunAgain`].
//! 4. A plain assistant message is the final output (or, under
//!    [`CompletionPolicy::TerminationMarkers`], only when it carries a
//!    termination marker).
//!
//! Before dispatch, a forced tool choice is cleared once any tool or handoff
//! was used, if the agent asks for it.

use crate::agent::actions::{execute_computer_actions, execute_shell_calls};
use crate::agent::config::{CompletionPolicy, RunConfig};
use crate::agent::context::RunContext;
use crate::agent::definition::{Agent, AgentRegistry};
use crate::agent::events::{EventKind, EventSink};
use crate::agent::execution::{ToolWrapper, execute_tool_calls, should_continue};
use crate::agent::handoff::{HandoffTool, add_handoff_tools};
use crate::agent::response::{ProcessedResponse, process_response};
use crate::api::provider::ToolChoice;
use crate::error::{HandoffError, RunError};
use crate::{ConversationItem, ModelResponse};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Verdict of one step.
#[derive(Clone)]
pub enum NextStep {
    /// Ask the model again with the extended conversation.
    RunAgain,
    /// Replace the active agent and continue.
    HandOff(Arc<Agent>),
    /// Stop with this output.
    FinalOutput(Value),
}

impl NextStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalOutput(_))
    }
}

impl fmt::Debug for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunAgain => f.write_str("RunAgain"),
            Self::HandOff(agent) => f.debug_tuple("HandOff").field(&agent.name).finish(),
            Self::FinalOutput(value) => f.debug_tuple("FinalOutput").field(value).finish(),
        }
    }
}

/// Everything one step produced. Immutable once built.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The caller's input to the run.
    pub original_input: Vec<ConversationItem>,
    /// Items generated by earlier steps of this run.
    pub pre_step_items: Vec<ConversationItem>,
    /// Items generated by this step: canonical response items followed by
    /// call outputs.
    pub new_step_items: Vec<ConversationItem>,
    pub model_response: ModelResponse,
    pub next_step: NextStep,
}

impl StepResult {
    /// Every item this run generated so far.
    pub fn generated_items(&self) -> impl Iterator<Item = &ConversationItem> {
        self.pre_step_items.iter().chain(&self.new_step_items)
    }

    /// The full conversation after this step.
    pub fn conversation(&self) -> Vec<ConversationItem> {
        self.original_input
            .iter()
            .chain(self.generated_items())
            .cloned()
            .collect()
    }
}

/// Shared state a step needs besides the response itself.
#[derive(Clone, Copy)]
pub struct StepEnv<'a> {
    pub agent: &'a Agent,
    pub registry: &'a AgentRegistry,
    pub ctx: &'a RunContext,
    pub config: &'a RunConfig,
    pub wrapper: Option<&'a dyn ToolWrapper>,
    pub sink: &'a EventSink,
}

/// Run the step state machine for one model response.
///
/// `tool_choice` is the active agent's effective tool choice; it is cleared
/// in place when the agent resets its forced choice after tool use.
pub async fn process_step(
    env: StepEnv<'_>,
    original_input: &[ConversationItem],
    pre_step_items: &[ConversationItem],
    response: ModelResponse,
    tool_choice: &mut Option<ToolChoice>,
) -> Result<StepResult, RunError> {
    let agent = env.agent;
    let handoff_tools = add_handoff_tools(&agent.handoffs)?;
    let processed = process_response(&response, agent, &agent.tools, &handoff_tools);
    debug!(
        "Step for {}: {} item(s), {} call(s), {} handoff(s)",
        agent.name,
        processed.items.len(),
        processed.function_calls.len(),
        processed.handoffs.len()
    );

    if let Some(text) = processed.final_text() {
        env.sink.emit(EventKind::MessageComplete {
            agent: agent.name.clone(),
            text: text.to_string(),
        });
    }

    if agent.reset_tool_choice
        && processed.tool_used()
        && matches!(tool_choice, Some(ToolChoice::Required | ToolChoice::Named(_)))
    {
        debug!("Resetting forced tool choice for {}", agent.name);
        *tool_choice = None;
    }

    let mut new_items = processed.items.clone();
    let next_step = if processed.handoffs_detected() {
        run_handoff(env, &processed, &handoff_tools, &mut new_items)?
    } else if processed.has_tools_or_actions_to_run() {
        run_tools(env, &processed, &mut new_items).await
    } else {
        plain_message(env, &processed)
    };

    Ok(StepResult {
        original_input: original_input.to_vec(),
        pre_step_items: pre_step_items.to_vec(),
        new_step_items: new_items,
        model_response: response,
        next_step,
    })
}

fn run_handoff(
    env: StepEnv<'_>,
    processed: &ProcessedResponse,
    handoff_tools: &[HandoffTool],
    new_items: &mut Vec<ConversationItem>,
) -> Result<NextStep, RunError> {
    let Some((first, rest)) = processed.handoffs.split_first() else {
        return Err(HandoffError::NoTarget.into());
    };
    let tool = handoff_tools
        .iter()
        .find(|t| t.tool_name() == first.tool_name)
        .ok_or_else(|| HandoffError::UnknownAgent(first.target_agent.clone()))?;

    let (target, outcome) = tool.transfer(&first.data, env.ctx, env.registry)?;
    let from = outcome
        .previous_agent
        .clone()
        .unwrap_or_else(|| env.agent.name.clone());

    new_items.push(ConversationItem::function_output(
        &first.call_id,
        json!({ "assistant": target.name }).to_string(),
    ));
    for ignored in rest {
        debug!("Ignoring extra handoff to {}", ignored.target_agent);
        new_items.push(ConversationItem::function_output(
            &ignored.call_id,
            format!(
                "Handoff to '{}' ignored: only the first handoff in a response is executed.",
                ignored.target_agent
            ),
        ));
    }
    let skipped = format!("Skipped: control was handed off to '{}'.", target.name);
    let skipped_ids = processed
        .function_calls
        .iter()
        .map(|c| &c.call_id)
        .chain(processed.computer_actions.iter().map(|c| &c.call_id))
        .chain(processed.shell_calls.iter().map(|c| &c.call_id));
    for call_id in skipped_ids {
        new_items.push(ConversationItem::function_output(call_id, skipped.clone()));
    }

    env.sink.emit(EventKind::AgentHandoff {
        from,
        to: target.name.clone(),
        data: outcome.handoff_data,
    });
    Ok(NextStep::HandOff(target))
}

async fn run_tools(
    env: StepEnv<'_>,
    processed: &ProcessedResponse,
    new_items: &mut Vec<ConversationItem>,
) -> NextStep {
    let exec = &env.config.tool_execution;
    let mut outcome = execute_tool_calls(
        &processed.function_calls,
        new_items,
        &env.agent.tools,
        env.ctx,
        exec,
        env.wrapper,
        env.sink,
    )
    .await;
    if !processed.computer_actions.is_empty() {
        outcome.merge(
            execute_computer_actions(
                &processed.computer_actions,
                new_items,
                env.agent,
                env.ctx,
                exec.max_result_bytes,
                env.sink,
            )
            .await,
        );
    }
    if !processed.shell_calls.is_empty() {
        outcome.merge(
            execute_shell_calls(
                &processed.shell_calls,
                new_items,
                env.agent,
                env.ctx,
                exec.max_result_bytes,
                env.sink,
            )
            .await,
        );
    }

    match outcome.final_output {
        Some(value) => {
            debug!("Tool marked completion for {}", env.agent.name);
            NextStep::FinalOutput(value)
        }
        None => NextStep::RunAgain,
    }
}

fn plain_message(env: StepEnv<'_>, processed: &ProcessedResponse) -> NextStep {
    let Some(text) = processed.final_text() else {
        return NextStep::FinalOutput(Value::Null);
    };
    if env.config.completion == CompletionPolicy::TerminationMarkers
        && should_continue(text, false)
    {
        debug!("No termination marker in message from {}; running again", env.agent.name);
        return NextStep::RunAgain;
    }
    NextStep::FinalOutput(final_value(env.agent, text))
}

/// The final output for `text`: parsed and validated JSON when the agent
/// declares a `response_format`, the plain string otherwise.
pub fn final_value(agent: &Agent, text: &str) -> Value {
    let Some(schema) = &agent.response_format else {
        return Value::String(text.to_string());
    };
    let parsed: Value = match serde_json::from_str(text.trim()) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "Structured output from {} is not valid JSON ({e}); returning raw text",
                agent.name
            );
            return Value::String(text.to_string());
        }
    };
    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            let errors: Vec<String> = validator
                .iter_errors(&parsed)
                .map(|e| format!("{}: {e}", e.instance_path()))
                .collect();
            if !errors.is_empty() {
                warn!(
                    "Structured output from {} does not match its schema: {}",
                    agent.name,
                    errors.join("; ")
                );
            }
        }
        Err(e) => warn!("Response format for {} is not a valid schema: {e}", agent.name),
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDef;
    use crate::agent::handoff::HandoffConfig;
    use crate::tools::core::{FnTool, ToolOutput};

    struct Fixture {
        registry: AgentRegistry,
        ctx: RunContext,
        config: RunConfig,
        sink: EventSink,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: AgentRegistry::new()
                    .with(Agent::new("billing", "Billing."))
                    .with(Agent::new("support", "Support.")),
                ctx: RunContext::default(),
                config: RunConfig::default(),
                sink: EventSink::none(),
            }
        }

        fn env<'a>(&'a self, agent: &'a Agent) -> StepEnv<'a> {
            StepEnv {
                agent,
                registry: &self.registry,
                ctx: &self.ctx,
                config: &self.config,
                wrapper: None,
                sink: &self.sink,
            }
        }
    }

    fn triage() -> Agent {
        Agent::new("triage", "Route.")
            .with_handoff(HandoffConfig::new("billing"))
            .with_handoff(HandoffConfig::new("support"))
            .with_tool(FnTool::new(
                ToolDef::new("lookup", "Look up", serde_json::json!({"type": "object"})),
                |_: Value, _| async { Ok::<_, String>("found") },
            ))
            .with_tool(FnTool::new(
                ToolDef::new("finish", "Finish", serde_json::json!({"type": "object"})),
                |args: Value, _| async move { Ok::<_, String>(ToolOutput::final_output(args)) },
            ))
    }

    fn outputs(items: &[ConversationItem]) -> Vec<(String, String)> {
        items
            .iter()
            .filter_map(|i| match i {
                ConversationItem::FunctionCallOutput { call_id, output } => {
                    Some((call_id.clone(), output.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn plain_message_is_final() {
        let fx = Fixture::new();
        let agent = triage();
        let mut choice = None;
        let step = process_step(
            fx.env(&agent),
            &[ConversationItem::user("hi")],
            &[],
            ModelResponse::new().with_message("Hello!"),
            &mut choice,
        )
        .await
        .unwrap();
        assert!(matches!(step.next_step, NextStep::FinalOutput(Value::String(ref s)) if s == "Hello!"));
        assert_eq!(step.new_step_items, vec![ConversationItem::assistant("Hello!")]);
        assert_eq!(step.conversation().len(), 2);
    }

    #[tokio::test]
    async fn tool_calls_run_again() {
        let fx = Fixture::new();
        let agent = triage();
        let mut choice = Some(ToolChoice::Required);
        let step = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_function_call("c1", "lookup", "{}"),
            &mut choice,
        )
        .await
        .unwrap();
        assert!(matches!(step.next_step, NextStep::RunAgain));
        assert_eq!(outputs(&step.new_step_items), vec![("c1".into(), "found".into())]);
        assert_eq!(choice, None);
    }

    #[tokio::test]
    async fn tool_choice_kept_without_reset() {
        let fx = Fixture::new();
        let agent = triage().with_reset_tool_choice(false);
        let mut choice = Some(ToolChoice::Named("lookup".into()));
        process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_function_call("c1", "lookup", "{}"),
            &mut choice,
        )
        .await
        .unwrap();
        assert_eq!(choice, Some(ToolChoice::Named("lookup".into())));
    }

    #[tokio::test]
    async fn final_tool_output_short_circuits() {
        let fx = Fixture::new();
        let agent = triage();
        let step = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_function_call("c1", "finish", r#"{"answer": 1}"#),
            &mut None,
        )
        .await
        .unwrap();
        assert!(matches!(step.next_step, NextStep::FinalOutput(ref v) if v["answer"] == 1));
    }

    #[tokio::test]
    async fn first_handoff_wins_and_other_calls_are_answered() {
        let fx = Fixture::new();
        fx.ctx.with_handoff(|h| h.set_current_agent("triage"));
        let agent = triage();
        let mut choice = Some(ToolChoice::Required);
        let step = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new()
                .with_function_call("h1", "transfer_to_billing", r#"{"invoice": "7"}"#)
                .with_function_call("h2", "transfer_to_support", "{}")
                .with_function_call("c1", "lookup", "{}"),
            &mut choice,
        )
        .await
        .unwrap();

        match &step.next_step {
            NextStep::HandOff(target) => assert_eq!(target.name, "billing"),
            other => panic!("expected handoff, got {other:?}"),
        }
        let outs = outputs(&step.new_step_items);
        assert_eq!(outs.len(), 3);
        assert_eq!(outs[0], ("h1".into(), r#"{"assistant":"billing"}"#.into()));
        assert!(outs[1].1.contains("ignored"));
        assert!(outs[2].1.starts_with("Skipped"));
        assert_eq!(choice, None);
        assert_eq!(fx.ctx.current_agent().as_deref(), Some("billing"));
        assert_eq!(fx.ctx.handoff().shared_context()["invoice"], "7");
    }

    #[tokio::test]
    async fn unknown_handoff_target_is_fatal() {
        let fx = Fixture::new();
        let agent = Agent::new("triage", "Route.").with_handoff(HandoffConfig::new("legal"));
        let err = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_function_call("h1", "transfer_to_legal", "{}"),
            &mut None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Handoff(HandoffError::UnknownAgent(ref a)) if a == "legal"));
    }

    #[tokio::test]
    async fn termination_policy_requires_marker() {
        let mut fx = Fixture::new();
        fx.config.completion = CompletionPolicy::TerminationMarkers;
        let agent = triage();
        let step = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_message("Let's not stop working together."),
            &mut None,
        )
        .await
        .unwrap();
        assert!(matches!(step.next_step, NextStep::RunAgain));

        let step = process_step(
            fx.env(&agent),
            &[],
            &[],
            ModelResponse::new().with_message("Task is DONE."),
            &mut None,
        )
        .await
        .unwrap();
        assert!(step.next_step.is_terminal());
    }

    #[test]
    fn structured_output_parsing() {
        let agent = Agent::new("a", "A").with_response_format(serde_json::json!({
            "type": "object",
            "properties": {"score": {"type": "integer"}},
            "required": ["score"]
        }));
        assert_eq!(final_value(&agent, r#"{"score": 3}"#)["score"], 3);
        assert_eq!(final_value(&agent, "not json"), Value::String("not json".into()));
        // Schema violations are logged but the parsed value is kept.
        assert_eq!(final_value(&agent, r#"{"score": "x"}"#)["score"], "x");
        assert_eq!(
            final_value(&Agent::new("b", "B"), r#"{"score": 3}"#),
            Value::String(r#"{"score": 3}"#.into())
        );
    }

    #[tokio::test]
    async fn empty_response_is_null_output() {
        let fx = Fixture::new();
        let agent = triage();
        let step = process_step(fx.env(&agent), &[], &[], ModelResponse::new(), &mut None)
            .await
            .unwrap();
        assert!(matches!(step.next_step, NextStep::FinalOutput(Value::Null)));
    }
}
