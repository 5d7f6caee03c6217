//! Run events and event handlers.
//!
//! The runner reports every transition as a [`StreamEvent`]. In streaming
//! mode the events are queued for the consumer of a
//! [`StreamedRun`](super::stream::StreamedRun); in both modes they are also
//! delivered to the runner's [`EventHandler`], if one is configured.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | [`LifecycleHookAdapter`](super::hooks::LifecycleHookAdapter) | Typed per-lifecycle-point hooks |

use crate::FinishReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Which side of the loop a guardrail guards.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    Input,
    Output,
}

/// What happened.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Vendor-level text delta.
    RawContentDelta { delta: String },
    /// First chunk of a vendor-level tool call.
    RawToolCallStart {
        index: usize,
        call_id: Option<String>,
        name: String,
    },
    RawToolCallDelta { index: usize, arguments_delta: String },
    RawFinish {
        finish_reason: FinishReason,
        response_id: Option<String>,
    },
    AgentStart { agent: String, turn: u32 },
    AgentFinish { agent: String, turn: u32, output: Value },
    AgentHandoff { from: String, to: String, data: Value },
    /// A model request for this turn is about to be sent.
    MessageStart { agent: String, turn: u32 },
    /// The model produced an assistant message.
    MessageComplete { agent: String, text: String },
    ToolExecutionStart {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolExecutionComplete {
        call_id: String,
        name: String,
        output: String,
    },
    ToolExecutionError {
        call_id: String,
        name: String,
        error: String,
    },
    GuardrailStart { guardrail: String, kind: GuardrailKind },
    GuardrailComplete {
        guardrail: String,
        kind: GuardrailKind,
        tripwire_triggered: bool,
        message: String,
    },
    /// The run failed; the error itself is returned by the draining call.
    StreamError { message: String },
}

/// An event stamped with its emission time.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StreamEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StreamEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer for run events.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &StreamEvent) {
///         if let EventKind::MessageComplete { text, .. } = &event.kind {
///             println!("{text}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &StreamEvent) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let EventKind::ToolExecutionError { name, error, .. } = &event.kind {
///         eprintln!("{name} failed: {error}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&StreamEvent) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    fn on_event(&self, event: &StreamEvent) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_opt(metrics.map(MetricsHandler::new));
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &StreamEvent) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &StreamEvent) {
        match &event.kind {
            EventKind::RawContentDelta { delta } => {
                let preview: String = delta.chars().take(80).collect();
                trace!("Stream text delta: {preview}");
            }
            EventKind::RawToolCallStart { index, name, .. } => {
                trace!("Stream tool call #{index} started: {name}");
            }
            EventKind::RawToolCallDelta { index, arguments_delta } => {
                trace!("Stream tool call #{index} delta: {} bytes", arguments_delta.len());
            }
            EventKind::RawFinish { finish_reason, .. } => {
                trace!("Stream finished: {}", finish_reason.as_str());
            }
            EventKind::AgentStart { agent, turn } => {
                info!("[turn {turn}] agent {agent} active");
            }
            EventKind::AgentFinish { agent, turn, .. } => {
                info!("Agent {agent} produced final output at turn {turn}");
            }
            EventKind::AgentHandoff { from, to, .. } => {
                info!("Handoff {from} -> {to}");
            }
            EventKind::MessageStart { agent, turn } => {
                debug!("[turn {turn}] requesting model response for {agent}");
            }
            EventKind::MessageComplete { agent, text } => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "{agent}: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            EventKind::ToolExecutionStart { name, .. } => {
                debug!("Executing tool: {name}");
            }
            EventKind::ToolExecutionComplete { name, output, .. } => {
                debug!("Tool {name} result: {} bytes", output.len());
            }
            EventKind::ToolExecutionError { name, error, .. } => {
                warn!("Tool {name} failed: {error}");
            }
            EventKind::GuardrailStart { guardrail, kind } => {
                debug!("Running {kind:?} guardrail {guardrail}");
            }
            EventKind::GuardrailComplete {
                guardrail,
                kind,
                tripwire_triggered,
                message,
            } => {
                if *tripwire_triggered {
                    warn!("{kind:?} guardrail {guardrail} tripped: {message}");
                } else {
                    debug!("{kind:?} guardrail {guardrail} passed");
                }
            }
            EventKind::StreamError { message } => {
                error!("Run failed: {message}");
            }
        }
    }
}

// ── Sink ───────────────────────────────────────────────────────────

/// Where a run publishes its events: an optional handler plus, in streaming
/// mode, the consumer's queue.
#[derive(Clone, Default)]
pub struct EventSink {
    handler: Option<Arc<dyn EventHandler>>,
    queue: Option<UnboundedSender<StreamEvent>>,
}

impl EventSink {
    /// A sink that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_handler(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self {
            handler,
            queue: None,
        }
    }

    pub(crate) fn streaming(
        queue: UnboundedSender<StreamEvent>,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        Self {
            handler,
            queue: Some(queue),
        }
    }

    /// Whether a stream consumer is attached.
    pub fn is_streaming(&self) -> bool {
        self.queue.is_some()
    }

    /// Timestamp and publish an event.
    pub fn emit(&self, kind: EventKind) {
        if self.handler.is_none() && self.queue.is_none() {
            return;
        }
        let event = StreamEvent::now(kind);
        if let Some(handler) = &self.handler {
            handler.on_event(&event);
        }
        if let Some(queue) = &self.queue {
            // A dropped receiver only means nobody is listening any more.
            let _ = queue.send(event);
        }
    }
}
