//! Shared helpers for integration tests.

#![allow(dead_code)]

use baton_rs::api::provider::{ModelRequest, Provider, ProviderFuture};
use baton_rs::error::ProviderError;
use baton_rs::{ConversationItem, ModelResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

/// Install a `RUST_LOG`-driven subscriber once per test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Replies from a fixed script and records every request it receives.
///
/// The last scripted reply repeats forever.
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    stateful: bool,
    stateful_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ModelResponse>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(script: Vec<Result<ModelResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            stateful: false,
            stateful_calls: AtomicUsize::new(0),
        })
    }

    pub fn stateful(replies: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
            stateful: true,
            stateful_calls: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests that arrived through `complete_stateful`.
    pub fn stateful_call_count(&self) -> usize {
        self.stateful_calls.load(Ordering::SeqCst)
    }

    fn next(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script
                .first()
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::server("script exhausted")))
        }
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
        let reply = self.next(request);
        Box::pin(async move { reply })
    }

    fn is_stateful(&self) -> bool {
        self.stateful
    }

    fn complete_stateful<'a>(&'a self, request: &'a ModelRequest) -> ProviderFuture<'a> {
        self.stateful_calls.fetch_add(1, Ordering::SeqCst);
        self.complete(request)
    }
}

pub fn user(text: &str) -> Vec<ConversationItem> {
    vec![ConversationItem::user(text)]
}
