//! The top-level run loop.
//!
//! [`Runner`] repeatedly requests a model response, hands it to the
//! [step processor](super::step::process_step) and acts on the verdict until
//! a final output is produced or the turn budget runs out. Input guardrails
//! run before the first provider call; output guardrails run after the final
//! output is computed and before success is reported.
//!
//! The same loop backs both execution modes: [`Runner::run`] awaits it
//! directly, [`Runner::run_streamed`] spawns it on a background task that
//! publishes [`StreamEvent`](super::events::StreamEvent)s.

use crate::agent::config::RunConfig;
use crate::agent::context::RunContext;
use crate::agent::definition::{Agent, AgentRegistry};
use crate::agent::events::{EventHandler, EventKind, EventSink};
use crate::agent::execution::ToolWrapper;
use crate::agent::guardrail::{Guardrail, run_input_guardrails, run_output_guardrails};
use crate::agent::handoff::{HandoffLink, add_handoff_tools};
use crate::agent::session::{Session, SessionStore};
use crate::agent::step::{NextStep, StepEnv, process_step};
use crate::agent::stream::StreamedRun;
use crate::api::continuation::{ContinuationConfig, complete_with_continuation};
use crate::api::provider::{ModelRequest, ModelSettings, Provider, ProviderChunk, ToolChoice};
use crate::api::tracing::{generate_span_id, generate_trace_id};
use crate::error::RunError;
use crate::tools::core::Tool;
use crate::{ConversationItem, Role, Usage};
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consulted once per turn boundary. `Ok(true)` stops the run; `Err` is
/// logged and treated as "do not stop".
pub type StopPredicate = Arc<dyn Fn(&RunContext, u32) -> Result<bool, String> + Send + Sync>;

// ── RunResult ─────────────────────────────────────────────────────

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Correlation id of this run.
    pub trace_id: String,
    /// The final canonical conversation: caller input followed by every
    /// generated item.
    pub messages: Vec<ConversationItem>,
    /// Items generated during this run.
    pub new_items: Vec<ConversationItem>,
    pub final_output: Value,
    /// Token usage across every provider call, continuation requests included.
    pub usage: Usage,
    pub last_agent: Arc<Agent>,
    /// Step processor invocations.
    pub turns: u32,
    pub success: bool,
    /// The stop predicate ended the run early.
    pub interrupted: bool,
    /// Handoffs performed, oldest first (bounded).
    pub handoff_chain: Vec<HandoffLink>,
}

impl RunResult {
    /// The final output as text, if it is a string.
    pub fn final_text(&self) -> Option<&str> {
        self.final_output.as_str()
    }

    pub fn last_message(&self) -> Option<&ConversationItem> {
        self.messages.last()
    }
}

// ── Runner ────────────────────────────────────────────────────────

/// Drives runs against one provider.
///
/// Cheap to clone; every run gets its own context, conversation and usage
/// counters, so one runner can serve concurrent runs.
///
/// ```ignore
/// let runner = Runner::new(provider)
///     .with_agent(billing)
///     .with_config(RunConfig::new().with_max_turns(8))
///     .with_event_handler(LoggingHandler);
///
/// let result = runner.run(&triage, &[ConversationItem::user("Refund please")]).await?;
/// ```
#[derive(Clone)]
pub struct Runner {
    provider: Arc<dyn Provider>,
    registry: AgentRegistry,
    config: RunConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
    tool_wrapper: Option<Arc<dyn ToolWrapper>>,
    stop_predicate: Option<StopPredicate>,
}

impl Runner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            registry: AgentRegistry::new(),
            config: RunConfig::default(),
            event_handler: None,
            tool_wrapper: None,
            stop_predicate: None,
        }
    }

    /// Make an agent available as a handoff target.
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.registry.register(Arc::new(agent));
        self
    }

    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.event_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_tool_wrapper(mut self, wrapper: impl ToolWrapper + 'static) -> Self {
        self.tool_wrapper = Some(Arc::new(wrapper));
        self
    }

    pub fn with_stop_predicate(
        mut self,
        predicate: impl Fn(&RunContext, u32) -> Result<bool, String> + Send + Sync + 'static,
    ) -> Self {
        self.stop_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run to completion, starting with `agent`. `input` is never modified.
    pub async fn run(
        &self,
        agent: &Arc<Agent>,
        input: &[ConversationItem],
    ) -> Result<RunResult, RunError> {
        let sink = EventSink::with_handler(self.event_handler.clone());
        self.drive(agent.clone(), input.to_vec(), &sink).await
    }

    /// Run starting with a registered agent.
    pub async fn run_named(
        &self,
        agent: &str,
        input: &[ConversationItem],
    ) -> Result<RunResult, RunError> {
        let agent = self
            .registry
            .get(agent)
            .ok_or_else(|| RunError::AgentNotFound(agent.to_string()))?;
        self.run(&agent, input).await
    }

    /// Run the same loop on a background task and stream its events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_streamed(&self, agent: &Arc<Agent>, input: &[ConversationItem]) -> StreamedRun {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::streaming(tx, self.event_handler.clone());
        let runner = self.clone();
        let agent = agent.clone();
        let input = input.to_vec();
        let handle = tokio::spawn(async move {
            let result = runner.drive(agent, input, &sink).await;
            if let Err(e) = &result {
                sink.emit(EventKind::StreamError {
                    message: e.to_string(),
                });
            }
            result
        });
        StreamedRun::new(rx, handle)
    }

    /// Run with the stored history of `session_id` prepended to `input`, then
    /// store the updated conversation. Nothing is stored if the run fails.
    pub async fn run_in_session(
        &self,
        agent: &Arc<Agent>,
        store: &dyn SessionStore,
        session_id: &str,
        input: &[ConversationItem],
    ) -> Result<RunResult, RunError> {
        let mut session = store
            .retrieve(session_id)?
            .unwrap_or_else(|| Session::new(session_id));
        let history = session.messages.len();
        let mut full_input = session.messages.clone();
        full_input.extend_from_slice(input);

        let result = self.run(agent, &full_input).await?;

        session.messages = result.messages.clone();
        session.touch();
        store.store(session)?;
        debug!(
            "Session {session_id} updated: {history} -> {} item(s)",
            result.messages.len()
        );
        Ok(result)
    }

    // ── The loop ──────────────────────────────────────────────────

    async fn drive(
        &self,
        starting_agent: Arc<Agent>,
        input: Vec<ConversationItem>,
        sink: &EventSink,
    ) -> Result<RunResult, RunError> {
        let ctx = RunContext::new(generate_trace_id(), self.config.context.clone());
        ctx.with_handoff(|h| h.set_current_agent(&starting_agent.name));
        info!(
            "Run started: trace_id={}, agent={}, provider={}",
            ctx.trace_id(),
            starting_agent.name,
            self.provider.name()
        );

        let mut registry = self.registry.clone();
        if !registry.contains(&starting_agent.name) {
            registry.register(starting_agent.clone());
        }

        let input_guardrails = merged(&self.config.input_guardrails, &starting_agent.input_guardrails);
        run_input_guardrails(&input_guardrails, &ctx, &starting_agent, &input, sink).await?;

        let continuation = self
            .config
            .continuation
            .active()
            .cloned()
            .unwrap_or_else(ContinuationConfig::single_request);
        let wrapper = self.tool_wrapper.as_deref();

        let mut agent = starting_agent;
        let mut tool_choice = agent.settings.tool_choice.clone();
        let mut generated: Vec<ConversationItem> = Vec::new();
        let mut usage = Usage::default();
        let mut turns: u32 = 0;

        sink.emit(EventKind::AgentStart {
            agent: agent.name.clone(),
            turn: 1,
        });

        loop {
            turns += 1;
            let max_turns = self.config.effective_max_turns(agent.max_turns);
            if turns > max_turns {
                warn!(
                    "Max turns ({max_turns}) exceeded: trace_id={}, agent={}",
                    ctx.trace_id(),
                    agent.name
                );
                return Err(RunError::MaxTurns { max_turns });
            }

            if self.should_stop(&ctx, turns) {
                info!("Stop predicate fired before turn {turns}: ending run");
                let output = last_assistant_text(&generated).map_or(Value::Null, Value::String);
                return self
                    .finish(&ctx, agent, input, generated, output, usage, turns - 1, true, sink)
                    .await;
            }

            debug!("Turn {}: agent={}", generate_span_id(ctx.trace_id(), turns), agent.name);
            sink.emit(EventKind::MessageStart {
                agent: agent.name.clone(),
                turn: turns,
            });

            let request = build_request(&agent, &tool_choice, &ctx, &input, &generated, sink.is_streaming())?;
            let outcome = if sink.is_streaming() {
                let mut on_chunk = |chunk: ProviderChunk| emit_chunk(sink, chunk);
                complete_with_continuation(
                    self.provider.as_ref(),
                    &request,
                    &continuation,
                    Some(&mut on_chunk),
                )
                .await?
            } else {
                complete_with_continuation(self.provider.as_ref(), &request, &continuation, None).await?
            };
            usage += outcome.response.usage;
            if outcome.truncated {
                warn!(
                    "Turn {turns} output still truncated after {} request(s)",
                    outcome.attempts
                );
            }

            let env = StepEnv {
                agent: &agent,
                registry: &registry,
                ctx: &ctx,
                config: &self.config,
                wrapper,
                sink,
            };
            let step = process_step(env, &input, &generated, outcome.response, &mut tool_choice).await?;
            generated.extend(step.new_step_items);

            match step.next_step {
                NextStep::RunAgain => {}
                NextStep::HandOff(target) => {
                    agent = target;
                    tool_choice = agent.settings.tool_choice.clone();
                    sink.emit(EventKind::AgentStart {
                        agent: agent.name.clone(),
                        turn: turns + 1,
                    });
                }
                NextStep::FinalOutput(output) => {
                    return self
                        .finish(&ctx, agent, input, generated, output, usage, turns, false, sink)
                        .await;
                }
            }
        }
    }

    fn should_stop(&self, ctx: &RunContext, turn: u32) -> bool {
        let Some(predicate) = &self.stop_predicate else {
            return false;
        };
        match catch_unwind(AssertUnwindSafe(|| predicate(ctx, turn))) {
            Ok(Ok(stop)) => stop,
            Ok(Err(e)) => {
                warn!("Stop predicate failed: {e}. Continuing.");
                false
            }
            Err(_) => {
                warn!("Stop predicate panicked. Continuing.");
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        ctx: &RunContext,
        agent: Arc<Agent>,
        input: Vec<ConversationItem>,
        generated: Vec<ConversationItem>,
        output: Value,
        usage: Usage,
        turns: u32,
        interrupted: bool,
        sink: &EventSink,
    ) -> Result<RunResult, RunError> {
        let output_guardrails = merged(&self.config.output_guardrails, &agent.output_guardrails);
        run_output_guardrails(&output_guardrails, ctx, &agent, &output, sink).await?;

        sink.emit(EventKind::AgentFinish {
            agent: agent.name.clone(),
            turn: turns,
            output: output.clone(),
        });
        info!(
            "Run finished: trace_id={}, agent={}, turns={turns}, tokens={} (in={}, out={})",
            ctx.trace_id(),
            agent.name,
            usage.total_tokens,
            usage.input_tokens,
            usage.output_tokens
        );

        let mut messages = input;
        messages.extend(generated.iter().cloned());
        Ok(RunResult {
            trace_id: ctx.trace_id().to_string(),
            messages,
            new_items: generated,
            final_output: output,
            usage,
            last_agent: agent,
            turns,
            success: true,
            interrupted,
            handoff_chain: ctx.handoff().chain().iter().cloned().collect(),
        })
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("provider", &self.provider.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("event_handler", &self.event_handler.is_some())
            .field("tool_wrapper", &self.tool_wrapper.is_some())
            .field("stop_predicate", &self.stop_predicate.is_some())
            .finish()
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn merged(run_level: &[Arc<dyn Guardrail>], agent_level: &[Arc<dyn Guardrail>]) -> Vec<Arc<dyn Guardrail>> {
    run_level.iter().chain(agent_level).cloned().collect()
}

fn last_assistant_text(items: &[ConversationItem]) -> Option<String> {
    items
        .iter()
        .rev()
        .find(|i| i.role() == Some(Role::Assistant))
        .and_then(ConversationItem::text)
        .map(str::to_string)
}

fn build_request(
    agent: &Agent,
    tool_choice: &Option<ToolChoice>,
    ctx: &RunContext,
    input: &[ConversationItem],
    generated: &[ConversationItem],
    stream: bool,
) -> Result<ModelRequest, RunError> {
    let mut tools = agent.tools.enabled_definitions(ctx);
    tools.extend(
        add_handoff_tools(&agent.handoffs)?
            .iter()
            .filter(|h| h.is_enabled(ctx))
            .map(Tool::definition),
    );
    Ok(ModelRequest {
        model: agent.model.clone(),
        instructions: agent.instructions.clone(),
        input: input.iter().chain(generated).cloned().collect(),
        tools,
        response_format: agent.response_format.clone(),
        settings: ModelSettings {
            tool_choice: tool_choice.clone(),
            ..agent.settings.clone()
        },
        previous_response_id: None,
        stream,
    })
}

/// Publish a vendor chunk as a raw stream event.
fn emit_chunk(sink: &EventSink, chunk: ProviderChunk) {
    match chunk {
        ProviderChunk::ContentDelta(delta) => sink.emit(EventKind::RawContentDelta { delta }),
        ProviderChunk::ToolCallDelta {
            index,
            call_id,
            name,
            arguments_delta,
        } => {
            if let Some(name) = name {
                sink.emit(EventKind::RawToolCallStart {
                    index,
                    call_id,
                    name,
                });
            }
            if !arguments_delta.is_empty() {
                sink.emit(EventKind::RawToolCallDelta {
                    index,
                    arguments_delta,
                });
            }
        }
        ProviderChunk::Finish {
            finish_reason,
            response_id,
        } => sink.emit(EventKind::RawFinish {
            finish_reason,
            response_id,
        }),
        ProviderChunk::Item(_) | ProviderChunk::Usage(_) => {}
    }
}
