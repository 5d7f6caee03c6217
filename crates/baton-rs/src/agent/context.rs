//! Per-run shared state handed to tools, guardrails, predicates and callbacks.

use crate::agent::handoff::HandoffContext;
use crate::api::tracing::generate_trace_id;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to the state of one run.
///
/// Clones share the same underlying state. Locks are never held across an
/// `.await`; every accessor takes and releases its lock internally.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

struct Inner {
    trace_id: String,
    values: Mutex<Map<String, Value>>,
    handoff: Mutex<HandoffContext>,
}

impl RunContext {
    pub fn new(trace_id: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Inner {
                trace_id: trace_id.into(),
                values: Mutex::new(values),
                handoff: Mutex::new(HandoffContext::default()),
            }),
        }
    }

    /// Correlation id of the run.
    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    /// Read a caller-supplied context value.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.values).get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        lock(&self.inner.values).insert(key.into(), value);
    }

    /// Copy of all context values.
    pub fn values(&self) -> Map<String, Value> {
        lock(&self.inner.values).clone()
    }

    /// Name of the agent currently in control.
    pub fn current_agent(&self) -> Option<String> {
        lock(&self.inner.handoff).current_agent().map(str::to_string)
    }

    /// Snapshot of the handoff state.
    pub fn handoff(&self) -> HandoffContext {
        lock(&self.inner.handoff).clone()
    }

    /// Run `f` with exclusive access to the handoff state.
    pub fn with_handoff<R>(&self, f: impl FnOnce(&mut HandoffContext) -> R) -> R {
        f(&mut lock(&self.inner.handoff))
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(generate_trace_id(), Map::new())
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("trace_id", &self.inner.trace_id)
            .field("current_agent", &self.current_agent())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_state() {
        let ctx = RunContext::default();
        let other = ctx.clone();
        other.set("user_id", json!(42));
        assert_eq!(ctx.get("user_id"), Some(json!(42)));
        assert!(ctx.trace_id().starts_with("tr-"));
    }

    #[test]
    fn handoff_state_is_shared() {
        let ctx = RunContext::default();
        ctx.with_handoff(|h| h.set_current_agent("triage"));
        assert_eq!(ctx.clone().current_agent().as_deref(), Some("triage"));
        assert_eq!(ctx.handoff().current_agent(), Some("triage"));
    }

    #[test]
    fn initial_values_are_visible() {
        let mut values = Map::new();
        values.insert("tier".into(), json!("gold"));
        let ctx = RunContext::new("tr-test", values);
        assert_eq!(ctx.trace_id(), "tr-test");
        assert_eq!(ctx.values().len(), 1);
        assert_eq!(ctx.get("tier"), Some(json!("gold")));
        assert_eq!(ctx.get("missing"), None);
    }
}
