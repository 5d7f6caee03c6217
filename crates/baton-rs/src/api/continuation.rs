//! Continuation Controller: bounded follow-up requests for truncated output.
//!
//! Only a [`FinishReason::Length`] finish triggers a follow-up. The other
//! finishes are handled distinctly:
//!
//! | Finish | Log level | Result |
//! |--------|-----------|--------|
//! | `Length` | `info!` | follow-up request, up to `max_attempts` in total |
//! | `ContentFilter`, `Incomplete` | `warn!` | returned as-is |
//! | `Error` | `error!` | surfaced as a `ModelError` |
//! | anything else | none | returned as-is |

use crate::api::provider::{ChunkSink, ModelRequest, Provider, ProviderChunk, send_request};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::{ConversationItem, FinishReason, ModelResponse, Usage};
use crate::agent::response::item_text;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

/// Default prompt appended for stateless follow-up requests.
pub const DEFAULT_CONTINUE_PROMPT: &str =
    "Continue exactly where you left off. Do not repeat any earlier text.";

/// How text from successive attempts is joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Ordered concatenation with nothing in between.
    #[default]
    Concatenate,
    /// Ordered concatenation with a separator between attempts.
    Separator(String),
}

impl MergeStrategy {
    fn merge(&self, accumulated: &mut String, piece: &str) {
        if let Self::Separator(sep) = self
            && !accumulated.is_empty()
        {
            accumulated.push_str(sep);
        }
        accumulated.push_str(piece);
    }
}

#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    /// Total requests allowed, the initial one included.
    pub max_attempts: u32,
    pub merge: MergeStrategy,
    pub continue_prompt: String,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            merge: MergeStrategy::Concatenate,
            continue_prompt: DEFAULT_CONTINUE_PROMPT.to_string(),
        }
    }
}

impl ContinuationConfig {
    /// A config that never issues follow-ups.
    pub fn single_request() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_continue_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.continue_prompt = prompt.into();
        self
    }
}

/// The merged response plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationOutcome {
    /// The first response's output in provider order, with each follow-up's
    /// leading text merged into the trailing text item and its remaining
    /// items appended. Usage is summed.
    pub response: ModelResponse,
    /// Provider requests made.
    pub attempts: u32,
    /// The last response was still truncated when attempts ran out.
    pub truncated: bool,
}

/// Issue `request` and follow up on truncation, at most
/// `config.max_attempts` requests in total.
///
/// Stateful providers continue from the previous response id; stateless
/// ones get the partial text replayed as an assistant message followed by
/// `config.continue_prompt`.
pub async fn complete_with_continuation(
    provider: &dyn Provider,
    request: &ModelRequest,
    config: &ContinuationConfig,
    mut on_chunk: Option<ChunkSink<'_>>,
) -> Result<ContinuationOutcome, ProviderError> {
    let max_attempts = config.max_attempts.max(1);
    let mut current = request.clone();
    let mut output: Vec<Value> = Vec::new();
    let mut usage = Usage::default();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let response = match on_chunk.as_mut() {
            Some(sink) => {
                let sink: &mut (dyn FnMut(ProviderChunk) + Send) = &mut **sink;
                send_request(provider, &current, Some(sink)).await?
            }
            None => send_request(provider, &current, None).await?,
        };
        usage += response.usage;
        if attempts == 1 {
            output.clone_from(&response.output);
        } else {
            merge_follow_up(&mut output, &response.output, &config.merge);
        }

        let truncated = match &response.finish_reason {
            FinishReason::Length if attempts < max_attempts => {
                info!(
                    "Response truncated by {} (attempt {attempts}/{max_attempts}), requesting continuation",
                    provider.name()
                );
                let partial = response_text(&response.output);
                current = follow_up(provider, &current, &response, partial.as_deref(), config);
                continue;
            }
            FinishReason::Length => {
                info!(
                    "Response still truncated after {attempts} attempt(s), returning partial output"
                );
                true
            }
            FinishReason::ContentFilter => {
                warn!("Response stopped by content filter after {attempts} attempt(s)");
                false
            }
            FinishReason::Incomplete => {
                warn!("Response reported incomplete after {attempts} attempt(s)");
                false
            }
            FinishReason::Error(message) => {
                error!("Provider finished with an error: {message}");
                return Err(ProviderError::new(ProviderErrorKind::ModelError, message.clone()));
            }
            _ => false,
        };

        debug!("Completion finished after {attempts} request(s), truncated={truncated}");
        return Ok(ContinuationOutcome {
            response: ModelResponse {
                id: response.id,
                output,
                usage,
                finish_reason: response.finish_reason,
            },
            attempts,
            truncated,
        });
    }
}

fn is_text_item(item: &Value) -> bool {
    matches!(
        item.get("type").and_then(Value::as_str),
        Some("message") | Some("output_text")
    )
}

/// All text in one response, concatenated in order.
fn response_text(output: &[Value]) -> Option<String> {
    output
        .iter()
        .filter(|item| is_text_item(item))
        .filter_map(item_text)
        .reduce(|mut acc, t| {
            acc.push_str(&t);
            acc
        })
}

/// Fold a follow-up response into the accumulated output.
///
/// Leading text continues the trailing text item; every other item is
/// appended in arrival order.
fn merge_follow_up(output: &mut Vec<Value>, follow_up: &[Value], merge: &MergeStrategy) {
    let lead = follow_up.iter().take_while(|item| is_text_item(item)).count();
    if let Some(piece) = response_text(&follow_up[..lead]) {
        let text = match output.last() {
            Some(last) if is_text_item(last) => {
                let mut text = item_text(last).unwrap_or_default();
                merge.merge(&mut text, &piece);
                output.pop();
                text
            }
            _ => piece,
        };
        output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": text,
        }));
    }
    output.extend(follow_up[lead..].iter().cloned());
}

fn follow_up(
    provider: &dyn Provider,
    previous: &ModelRequest,
    response: &ModelResponse,
    partial: Option<&str>,
    config: &ContinuationConfig,
) -> ModelRequest {
    let mut next = previous.clone();
    match &response.id {
        Some(id) if provider.is_stateful() => {
            next.previous_response_id = Some(id.clone());
            next.input = vec![ConversationItem::user(config.continue_prompt.clone())];
        }
        _ => {
            if let Some(partial) = partial {
                next.input.push(ConversationItem::assistant(partial));
            }
            next.input
                .push(ConversationItem::user(config.continue_prompt.clone()));
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::provider::ProviderFuture;
    use std::sync::Mutex;

    /// Replies with scripted responses in order, recording each request.
    struct Scripted {
        replies: Mutex<Vec<ModelResponse>>,
        requests: Mutex<Vec<ModelRequest>>,
        stateful: bool,
    }

    impl Scripted {
        fn new(replies: Vec<ModelResponse>) -> Self {
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
                stateful: false,
            }
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn reply(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.remove(0))
            } else {
                Ok(replies[0].clone())
            }
        }
    }

    impl Provider for Scripted {
        fn complete<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
            let reply = self.reply(request);
            Box::pin(async move { reply })
        }

        fn is_stateful(&self) -> bool {
            self.stateful
        }

        fn complete_stateful<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
            self.complete(request)
        }
    }

    fn truncated(text: &str) -> ModelResponse {
        ModelResponse::new()
            .with_id(format!("resp-{text}"))
            .with_message(text)
            .with_usage(Usage::new(10, 5))
            .with_finish_reason(FinishReason::Length)
    }

    fn request() -> ModelRequest {
        ModelRequest {
            model: "m".into(),
            input: vec![ConversationItem::user("write a poem")],
            ..Default::default()
        }
    }

    fn text_of(response: &ModelResponse) -> String {
        item_text(&response.output[0]).unwrap()
    }

    #[tokio::test]
    async fn always_truncated_stops_at_max_attempts() {
        let provider = Scripted::new(vec![truncated("x")]);
        let outcome = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(provider.requests().len(), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.truncated);
        assert_eq!(text_of(&outcome.response), "xxx");
        assert_eq!(outcome.response.usage, Usage::new(30, 15));
    }

    #[tokio::test]
    async fn stops_on_normal_finish_and_merges() {
        let provider = Scripted::new(vec![
            truncated("Roses are red, "),
            ModelResponse::new().with_message("violets are blue.").with_usage(Usage::new(12, 4)),
        ]);
        let config = ContinuationConfig::default();
        let outcome = complete_with_continuation(&provider, &request(), &config, None)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.truncated);
        assert_eq!(text_of(&outcome.response), "Roses are red, violets are blue.");
        assert_eq!(outcome.response.usage.total_tokens, 31);

        let requests = provider.requests();
        let follow_up = &requests[1].input;
        assert_eq!(follow_up.len(), 3);
        assert_eq!(follow_up[1], ConversationItem::assistant("Roses are red, "));
        assert_eq!(follow_up[2].text(), Some(DEFAULT_CONTINUE_PROMPT));
        assert!(requests[1].previous_response_id.is_none());
    }

    #[tokio::test]
    async fn stateful_follow_up_uses_previous_id() {
        let mut provider = Scripted::new(vec![truncated("a"), ModelResponse::new().with_message("b")]);
        provider.stateful = true;
        let config = ContinuationConfig::default()
            .with_merge(MergeStrategy::Separator(" | ".into()))
            .with_continue_prompt("go on");
        let outcome = complete_with_continuation(&provider, &request(), &config, None)
            .await
            .unwrap();
        assert_eq!(text_of(&outcome.response), "a | b");
        let requests = provider.requests();
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp-a"));
        assert_eq!(requests[1].input, vec![ConversationItem::user("go on")]);
    }

    #[tokio::test]
    async fn content_filter_is_returned_without_follow_up() {
        let provider = Scripted::new(vec![
            ModelResponse::new()
                .with_message("partial")
                .with_finish_reason(FinishReason::ContentFilter),
        ]);
        let outcome = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(provider.requests().len(), 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.response.finish_reason, FinishReason::ContentFilter);
    }

    #[tokio::test]
    async fn error_finish_is_surfaced() {
        let provider = Scripted::new(vec![
            ModelResponse::new().with_finish_reason(FinishReason::Error("overloaded".into())),
        ]);
        let err = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ModelError);
        assert_eq!(err.message, "overloaded");
    }

    #[tokio::test]
    async fn single_request_never_follows_up() {
        let provider = Scripted::new(vec![truncated("x")]);
        let outcome =
            complete_with_continuation(&provider, &request(), &ContinuationConfig::single_request(), None)
                .await
                .unwrap();
        assert_eq!(provider.requests().len(), 1);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn tool_calls_survive_merging() {
        let provider = Scripted::new(vec![
            ModelResponse::new()
                .with_message("Let me check.")
                .with_function_call("c1", "lookup", "{}"),
        ]);
        let outcome = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome.response.output.len(), 2);
        assert_eq!(outcome.response.output[1]["type"], "function_call");
        assert_eq!(outcome.response.finish_reason, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn single_response_keeps_provider_order() {
        let response = ModelResponse::new()
            .with_message("Looking up.")
            .with_function_call("c1", "lookup", "{}")
            .with_message("Done.");
        let provider = Scripted::new(vec![response.clone()]);
        let outcome = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome.response.output, response.output);
    }

    #[tokio::test]
    async fn follow_up_text_extends_the_trailing_message() {
        let provider = Scripted::new(vec![
            ModelResponse::new()
                .with_message("Checking.")
                .with_function_call("c1", "lookup", "{}")
                .with_message("The answer is")
                .with_finish_reason(FinishReason::Length),
            ModelResponse::new()
                .with_message(" 42.")
                .with_function_call("c2", "record", "{}"),
        ]);
        let outcome = complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), None)
            .await
            .unwrap();
        let output = &outcome.response.output;
        assert_eq!(output.len(), 4);
        assert_eq!(item_text(&output[0]).as_deref(), Some("Checking."));
        assert_eq!(output[1]["call_id"], "c1");
        assert_eq!(item_text(&output[2]).as_deref(), Some("The answer is 42."));
        assert_eq!(output[3]["call_id"], "c2");
    }

    #[tokio::test]
    async fn chunks_reach_the_sink_for_every_attempt() {
        let provider = Scripted::new(vec![truncated("a"), ModelResponse::new().with_message("b")]);
        let mut deltas = Vec::new();
        let mut sink = |chunk: ProviderChunk| {
            if let ProviderChunk::ContentDelta(d) = chunk {
                deltas.push(d);
            }
        };
        complete_with_continuation(&provider, &request(), &ContinuationConfig::default(), Some(&mut sink))
            .await
            .unwrap();
        assert_eq!(deltas, vec!["a", "b"]);
    }
}
