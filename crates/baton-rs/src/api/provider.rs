//! The provider seam: requests, the [`Provider`] capability and vendor
//! chunk streaming.
//!
//! A provider adapts one vendor API. Whatever the vendor returns must be
//! normalized into a [`ModelResponse`] before it reaches the runner.

use crate::agent::response::item_text;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::{ConversationItem, FinishReason, ModelResponse, ToolDef, Usage};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider`] methods.
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelResponse, ProviderError>> + Send + 'a>>;

/// Callback receiving vendor-level stream chunks.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(ProviderChunk) + Send);

// ── Request types ──────────────────────────────────────────────────

/// How the model may choose tools.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    /// Force one specific tool.
    Named(String),
}

/// Sampling and tool-choice parameters passed through to the provider.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Vendor-specific parameters.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelSettings {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Everything a provider needs for one completion.
#[derive(Serialize, Clone, Debug, Default)]
pub struct ModelRequest {
    pub model: String,
    pub instructions: String,
    /// Full canonical conversation (or only the new items when continuing a
    /// stateful response via `previous_response_id`).
    pub input: Vec<ConversationItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    pub settings: ModelSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub stream: bool,
}

// ── Provider ───────────────────────────────────────────────────────

/// One chunk of a vendor-level token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderChunk {
    ContentDelta(String),
    ToolCallDelta {
        index: usize,
        call_id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// A complete output item that is neither text nor a function call.
    Item(Value),
    Usage(Usage),
    Finish {
        finish_reason: FinishReason,
        response_id: Option<String>,
    },
}

/// A model vendor.
///
/// Timeouts are the provider's responsibility: a timed-out call should
/// return a [`ProviderErrorKind::Timeout`] error.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Provider for Echo {
///     fn complete<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
///         Box::pin(async move {
///             let last = request.input.last().and_then(|i| i.text()).unwrap_or_default();
///             Ok(ModelResponse::new().with_message(last))
///         })
///     }
/// }
/// ```
pub trait Provider: Send + Sync {
    /// Short vendor name for logs.
    fn name(&self) -> &str {
        "provider"
    }

    /// Stateless (chat-style) completion over the full conversation.
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a>;

    /// Whether the vendor keeps conversation state server-side and accepts
    /// `previous_response_id`.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Stateful (responses-style) completion continuing from
    /// `request.previous_response_id`.
    fn complete_stateful<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
        let _ = request;
        Box::pin(async move {
            Err(ProviderError::new(
                ProviderErrorKind::Unsupported,
                format!("{} does not support stateful completion", self.name()),
            ))
        })
    }

    /// Token-level streaming. The default completes the request the same way
    /// a blocking call would (statefully when continuing a previous response)
    /// and replays the response as chunks.
    fn stream_complete<'a>(
        &'a self,
        request: &'a ModelRequest,
        on_chunk: ChunkSink<'a>,
    ) -> ProviderFuture<'a> {
        Box::pin(async move {
            let response = if continues_stateful(self.is_stateful(), request) {
                self.complete_stateful(request).await?
            } else {
                self.complete(request).await?
            };
            for chunk in replay_chunks(&response) {
                on_chunk(chunk);
            }
            Ok(response)
        })
    }
}

/// Route a request to the right provider method.
pub async fn send_request(
    provider: &dyn Provider,
    request: &ModelRequest,
    on_chunk: Option<ChunkSink<'_>>,
) -> Result<ModelResponse, ProviderError> {
    match on_chunk {
        Some(sink) => provider.stream_complete(request, sink).await,
        None if continues_stateful(provider.is_stateful(), request) => {
            provider.complete_stateful(request).await
        }
        None => provider.complete(request).await,
    }
}

fn continues_stateful(stateful: bool, request: &ModelRequest) -> bool {
    stateful && request.previous_response_id.is_some()
}

// ── Chunk replay and assembly ──────────────────────────────────────

/// Split a complete response into the chunks a streaming vendor would send.
pub fn replay_chunks(response: &ModelResponse) -> Vec<ProviderChunk> {
    let mut chunks = Vec::new();
    let mut call_index = 0;
    for item in &response.output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") | Some("output_text") => {
                if let Some(text) = item_text(item) {
                    chunks.push(ProviderChunk::ContentDelta(text));
                }
            }
            Some("function_call") => {
                let arguments = match item.get("arguments") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                chunks.push(ProviderChunk::ToolCallDelta {
                    index: call_index,
                    call_id: item
                        .get("call_id")
                        .or_else(|| item.get("callId"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    name: item.get("name").and_then(Value::as_str).map(str::to_string),
                    arguments_delta: arguments,
                });
                call_index += 1;
            }
            _ => chunks.push(ProviderChunk::Item(item.clone())),
        }
    }
    chunks.push(ProviderChunk::Usage(response.usage));
    chunks.push(ProviderChunk::Finish {
        finish_reason: response.finish_reason.clone(),
        response_id: response.id.clone(),
    });
    chunks
}

/// Rebuild a canonical response from stream chunks.
///
/// Text deltas become one assistant message; tool-call deltas are
/// accumulated per index and dropped if they never received an id and name.
pub fn assemble_response(chunks: &[ProviderChunk]) -> ModelResponse {
    let mut text = String::new();
    let mut items = Vec::new();
    let mut calls: BTreeMap<usize, (Option<String>, Option<String>, String)> = BTreeMap::new();
    let mut response = ModelResponse::new();

    for chunk in chunks {
        match chunk {
            ProviderChunk::ContentDelta(delta) => text.push_str(delta),
            ProviderChunk::ToolCallDelta {
                index,
                call_id,
                name,
                arguments_delta,
            } => {
                let entry = calls.entry(*index).or_insert((None, None, String::new()));
                if let Some(id) = call_id {
                    entry.0 = Some(id.clone());
                }
                if let Some(name) = name {
                    entry.1 = Some(name.clone());
                }
                entry.2.push_str(arguments_delta);
            }
            ProviderChunk::Item(item) => items.push(item.clone()),
            ProviderChunk::Usage(usage) => response.usage = *usage,
            ProviderChunk::Finish {
                finish_reason,
                response_id,
            } => {
                response.finish_reason = finish_reason.clone();
                response.id = response_id.clone();
            }
        }
    }

    if !text.is_empty() {
        response.output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": text,
        }));
    }
    response.output.extend(items);
    for (id, name, arguments) in calls.into_values() {
        if let (Some(id), Some(name)) = (id, name) {
            response.output.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": arguments,
            }));
        }
    }
    response
}
