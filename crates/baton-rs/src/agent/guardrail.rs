//! Guardrail tripwire contract.
//!
//! Only the contract lives here: a [`Guardrail`] inspects the run input (or
//! the final output) and returns a [`GuardrailVerdict`]. The rules
//! themselves are supplied by the caller.

use crate::agent::context::RunContext;
use crate::agent::definition::Agent;
use crate::agent::events::{EventKind, EventSink, GuardrailKind};
use crate::error::RunError;
use crate::{ConversationItem, Role};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Boxed future returned by [`Guardrail::run`].
pub type GuardrailFuture<'a> = Pin<Box<dyn Future<Output = GuardrailVerdict> + Send + 'a>>;

/// Outcome of one guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuardrailVerdict {
    pub tripwire_triggered: bool,
    pub message: String,
}

impl GuardrailVerdict {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn trip(message: impl Into<String>) -> Self {
        Self {
            tripwire_triggered: true,
            message: message.into(),
        }
    }
}

/// What a guardrail is looking at.
#[derive(Debug, Clone, Copy)]
pub enum GuardrailPayload<'a> {
    Input(&'a [ConversationItem]),
    Output(&'a Value),
}

impl GuardrailPayload<'_> {
    /// Plain text view: user messages joined by newlines for input, the
    /// output string (or its JSON) for output.
    pub fn text(&self) -> String {
        match self {
            Self::Input(items) => items
                .iter()
                .filter(|i| i.role() == Some(Role::User))
                .filter_map(ConversationItem::text)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Output(Value::String(s)) => s.clone(),
            Self::Output(Value::Null) => String::new(),
            Self::Output(other) => other.to_string(),
        }
    }
}

/// A check that can abort a run.
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(
        &'a self,
        ctx: &'a RunContext,
        agent: &'a Agent,
        payload: GuardrailPayload<'a>,
    ) -> GuardrailFuture<'a>;
}

/// A guardrail backed by a synchronous closure.
///
/// ```ignore
/// let max_len = FnGuardrail::new("max_length", |payload, _ctx| {
///     if payload.text().len() > 2_000 {
///         GuardrailVerdict::trip("input too long")
///     } else {
///         GuardrailVerdict::pass()
///     }
/// });
/// ```
pub struct FnGuardrail<F> {
    name: String,
    check: F,
}

impl<F> FnGuardrail<F>
where
    F: Fn(&GuardrailPayload<'_>, &RunContext) -> GuardrailVerdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> Guardrail for FnGuardrail<F>
where
    F: Fn(&GuardrailPayload<'_>, &RunContext) -> GuardrailVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        ctx: &'a RunContext,
        _agent: &'a Agent,
        payload: GuardrailPayload<'a>,
    ) -> GuardrailFuture<'a> {
        let verdict = (self.check)(&payload, ctx);
        Box::pin(async move { verdict })
    }
}

/// Run guardrails in order, stopping at the first tripwire.
///
/// Returns the tripped guardrail's name and verdict.
pub(crate) async fn first_tripwire(
    guardrails: &[Arc<dyn Guardrail>],
    kind: GuardrailKind,
    ctx: &RunContext,
    agent: &Agent,
    payload: GuardrailPayload<'_>,
    sink: &EventSink,
) -> Option<(String, GuardrailVerdict)> {
    for guardrail in guardrails {
        let name = guardrail.name().to_string();
        sink.emit(EventKind::GuardrailStart {
            guardrail: name.clone(),
            kind,
        });
        let verdict = guardrail.run(ctx, agent, payload).await;
        sink.emit(EventKind::GuardrailComplete {
            guardrail: name.clone(),
            kind,
            tripwire_triggered: verdict.tripwire_triggered,
            message: verdict.message.clone(),
        });
        if verdict.tripwire_triggered {
            warn!("{kind:?} guardrail '{name}' tripped: {}", verdict.message);
            return Some((name, verdict));
        }
    }
    None
}

/// Check the run input. A tripwire aborts before any provider call.
pub async fn run_input_guardrails(
    guardrails: &[Arc<dyn Guardrail>],
    ctx: &RunContext,
    agent: &Agent,
    input: &[ConversationItem],
    sink: &EventSink,
) -> Result<(), RunError> {
    match first_tripwire(
        guardrails,
        GuardrailKind::Input,
        ctx,
        agent,
        GuardrailPayload::Input(input),
        sink,
    )
    .await
    {
        Some((guardrail, verdict)) => Err(RunError::InputGuardrailTripwire {
            guardrail,
            message: verdict.message,
        }),
        None => Ok(()),
    }
}

/// Check the final output. A tripwire fails the run even though an output
/// was computed.
pub async fn run_output_guardrails(
    guardrails: &[Arc<dyn Guardrail>],
    ctx: &RunContext,
    agent: &Agent,
    output: &Value,
    sink: &EventSink,
) -> Result<(), RunError> {
    match first_tripwire(
        guardrails,
        GuardrailKind::Output,
        ctx,
        agent,
        GuardrailPayload::Output(output),
        sink,
    )
    .await
    {
        Some((guardrail, verdict)) => Err(RunError::OutputGuardrailTripwire {
            guardrail,
            message: verdict.message,
            output: output.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn max_length(limit: usize) -> FnGuardrail<impl Fn(&GuardrailPayload<'_>, &RunContext) -> GuardrailVerdict + Send + Sync> {
        FnGuardrail::new("max_length", move |payload: &GuardrailPayload<'_>, _ctx: &RunContext| {
            if payload.text().chars().count() > limit {
                GuardrailVerdict::trip(format!("input longer than {limit} characters"))
            } else {
                GuardrailVerdict::pass()
            }
        })
    }

    #[test]
    fn payload_text_views() {
        let items = vec![
            ConversationItem::system("sys"),
            ConversationItem::user("one"),
            ConversationItem::assistant("skip"),
            ConversationItem::user("two"),
        ];
        assert_eq!(GuardrailPayload::Input(&items).text(), "one\ntwo");
        assert_eq!(GuardrailPayload::Output(&json!("final")).text(), "final");
        assert_eq!(GuardrailPayload::Output(&json!({"a": 1})).text(), r#"{"a":1}"#);
        assert_eq!(GuardrailPayload::Output(&Value::Null).text(), "");
    }

    #[tokio::test]
    async fn input_tripwire_carries_message() {
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![Arc::new(max_length(5))];
        let agent = Agent::new("a", "A");
        let err = run_input_guardrails(
            &guardrails,
            &RunContext::default(),
            &agent,
            &[ConversationItem::user("far too long")],
            &EventSink::none(),
        )
        .await
        .unwrap_err();
        match err {
            RunError::InputGuardrailTripwire { guardrail, message } => {
                assert_eq!(guardrail, "max_length");
                assert!(message.contains("longer than 5"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stops_at_first_tripwire() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![
            Arc::new(FnGuardrail::new("always", |_: &GuardrailPayload<'_>, _: &RunContext| {
                GuardrailVerdict::trip("no")
            })),
            Arc::new(FnGuardrail::new("counted", move |_: &GuardrailPayload<'_>, _: &RunContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                GuardrailVerdict::pass()
            })),
        ];
        let result = run_output_guardrails(
            &guardrails,
            &RunContext::default(),
            &Agent::new("a", "A"),
            &json!("out"),
            &EventSink::none(),
        )
        .await;
        assert!(matches!(
            result,
            Err(RunError::OutputGuardrailTripwire { ref output, .. }) if output == &json!("out")
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn passing_guardrails() {
        let guardrails: Vec<Arc<dyn Guardrail>> = vec![Arc::new(max_length(100))];
        assert!(
            run_input_guardrails(
                &guardrails,
                &RunContext::default(),
                &Agent::new("a", "A"),
                &[ConversationItem::user("short")],
                &EventSink::none(),
            )
            .await
            .is_ok()
        );
    }
}
