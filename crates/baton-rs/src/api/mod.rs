//! Everything between the [`Runner`](crate::agent::runner::Runner) and a
//! model vendor.
//!
//! - [`provider`]: the [`Provider`] capability, request types and vendor
//!   chunk streaming.
//! - [`continuation`]: follow-up requests when output is cut off by a token
//!   limit.
//! - [`retry`]: exponential backoff for whole runs. Never retries
//!   authentication or invalid-request failures.
//! - [`tracing`]: correlation ids (`trace_id` / `span_id`).

pub mod continuation;
pub mod provider;
pub mod retry;
pub mod tracing;

// Re-export commonly used items at the module level.
pub use continuation::{ContinuationConfig, MergeStrategy};
pub use provider::{ModelRequest, ModelSettings, Provider, ProviderChunk, ProviderFuture, ToolChoice};
pub use retry::{RetryConfig, retry_run};
pub use tracing::{generate_span_id, generate_trace_id};
