//! Correlation IDs for runs.
//!
//! Each run gets a unique `trace_id`, and each turn within it a `span_id`
//! derived from the trace id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID for a run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // The counter separates ids minted within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Generate a span ID for a turn within a run.
pub fn generate_span_id(trace_id: &str, turn: u32) -> String {
    format!("{trace_id}:t{turn}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_unique() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert_ne!(a, b);
        assert!(a.starts_with("tr-"));
    }

    #[test]
    fn span_id_embeds_trace_and_turn() {
        assert_eq!(generate_span_id("tr-1", 3), "tr-1:t3");
    }
}
