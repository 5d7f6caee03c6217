//! Streamed runs and session-backed runs.

mod common;

use baton_rs::api::continuation::DEFAULT_CONTINUE_PROMPT;
use baton_rs::prelude::*;
use common::{ScriptedProvider, init_tracing, user};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

fn position(events: &[StreamEvent], pred: impl Fn(&EventKind) -> bool) -> usize {
    events
        .iter()
        .position(|e| pred(&e.kind))
        .unwrap_or_else(|| panic!("event not found in {events:#?}"))
}

#[tokio::test]
async fn events_arrive_in_emission_order() {
    init_tracing();
    let provider = ScriptedProvider::new(vec![ModelResponse::new().with_message("Streaming works")]);
    let agent = Arc::new(Agent::new("narrator", "Narrate."));

    let mut run = Runner::new(provider.clone()).run_streamed(&agent, &user("go"));
    let mut events = Vec::new();
    while let Some(event) = run.next_event().await.unwrap() {
        events.push(event);
    }
    let result = run.wait_for_completion().await.unwrap();

    let start = position(&events, |k| matches!(k, EventKind::AgentStart { .. }));
    let message_start = position(&events, |k| matches!(k, EventKind::MessageStart { turn: 1, .. }));
    let delta = position(&events, |k| matches!(k, EventKind::RawContentDelta { .. }));
    let finish = position(&events, |k| matches!(k, EventKind::RawFinish { .. }));
    let complete = position(&events, |k| matches!(k, EventKind::MessageComplete { .. }));
    let agent_finish = position(&events, |k| matches!(k, EventKind::AgentFinish { .. }));
    assert!(start < message_start);
    assert!(message_start < delta);
    assert!(delta < finish);
    assert!(finish < complete);
    assert!(complete < agent_finish);
    assert_eq!(agent_finish, events.len() - 1);

    let streamed: String = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RawContentDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Streaming works");

    assert_eq!(result.final_text(), Some("Streaming works"));
    assert!(provider.requests()[0].stream);
}

#[tokio::test]
async fn tool_calls_are_streamed_as_raw_events() {
    let provider = ScriptedProvider::new(vec![
        ModelResponse::new().with_function_call("c1", "echo", r#"{"text":"hi"}"#),
        ModelResponse::new().with_message("done"),
    ]);
    let echo = FnTool::new(
        ToolDef::new("echo", "Echo text", json!({"type": "object"})),
        |args: serde_json::Value, _ctx| async move { Ok::<_, String>(args["text"].to_string()) },
    );
    let agent = Arc::new(Agent::new("a", "A").with_tool(echo));

    let events: Vec<_> = Runner::new(provider)
        .run_streamed(&agent, &user("go"))
        .into_stream()
        .collect()
        .await;
    let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();

    let call_start = position(&events, |k| {
        matches!(k, EventKind::RawToolCallStart { name, .. } if name == "echo")
    });
    let exec_start = position(&events, |k| matches!(k, EventKind::ToolExecutionStart { .. }));
    let exec_done = position(&events, |k| matches!(k, EventKind::ToolExecutionComplete { .. }));
    assert!(call_start < exec_start);
    assert!(exec_start < exec_done);
}

#[tokio::test]
async fn streamed_stateful_continuation_resumes_the_previous_response() {
    init_tracing();
    let provider = ScriptedProvider::stateful(vec![
        ModelResponse::new()
            .with_id("resp_1")
            .with_message("Once upon")
            .with_finish_reason(FinishReason::Length),
        ModelResponse::new().with_id("resp_2").with_message(" a time."),
    ]);
    let agent = Arc::new(Agent::new("storyteller", "Tell stories."));

    let result = Runner::new(provider.clone())
        .run_streamed(&agent, &user("Begin."))
        .wait_for_completion()
        .await
        .unwrap();

    assert_eq!(result.final_text(), Some("Once upon a time."));
    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.stateful_call_count(), 1);
    let follow_up = &provider.requests()[1];
    assert_eq!(follow_up.previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(follow_up.input, vec![ConversationItem::user(DEFAULT_CONTINUE_PROMPT)]);
    assert!(follow_up.stream);
}

#[tokio::test]
async fn failures_are_reraised_after_the_last_event() {
    let provider = ScriptedProvider::with_results(vec![Err(ProviderError::authentication("bad key"))]);
    let agent = Arc::new(Agent::new("a", "A"));

    let mut run = Runner::new(provider).run_streamed(&agent, &user("go"));
    let mut last = None;
    let err = loop {
        match run.next_event().await {
            Ok(Some(event)) => last = Some(event),
            Ok(None) => panic!("stream ended without an error"),
            Err(e) => break e,
        }
    };

    assert!(matches!(err, RunError::Provider(_)));
    assert!(matches!(
        last.map(|e| e.kind),
        Some(EventKind::StreamError { message }) if message.contains("bad key")
    ));
}

#[tokio::test]
async fn sessions_carry_history_between_runs() {
    init_tracing();
    let provider = ScriptedProvider::new(vec![
        ModelResponse::new().with_message("Nice to meet you, Ana."),
        ModelResponse::new().with_message("Your name is Ana."),
    ]);
    let store = MemorySessionStore::new();
    let runner = Runner::new(provider.clone());
    let agent = Arc::new(Agent::new("assistant", "Be helpful."));

    runner
        .run_in_session(&agent, &store, "chat-1", &user("I am Ana."))
        .await
        .unwrap();
    let result = runner
        .run_in_session(&agent, &store, "chat-1", &user("What is my name?"))
        .await
        .unwrap();

    let second_request = &provider.requests()[1];
    assert_eq!(second_request.input.len(), 3);
    assert_eq!(second_request.input[0], ConversationItem::user("I am Ana."));
    assert_eq!(
        second_request.input[1],
        ConversationItem::assistant("Nice to meet you, Ana.")
    );

    let session = store.retrieve("chat-1").unwrap().unwrap();
    assert_eq!(session.messages, result.messages);
    assert_eq!(session.messages.len(), 4);
    assert!(session.updated_at >= session.created_at);

    let restored = Session::from_record(&session.to_record().unwrap()).unwrap();
    assert_eq!(restored, session);
}

#[tokio::test]
async fn failed_runs_leave_the_session_untouched() {
    let provider = ScriptedProvider::with_results(vec![Err(ProviderError::server("down"))]);
    let store = MemorySessionStore::new();
    store
        .store(Session::new("chat-2").with_metadata("user", json!("bo")))
        .unwrap();

    let result = Runner::new(provider)
        .run_in_session(&Arc::new(Agent::new("a", "A")), &store, "chat-2", &user("hello"))
        .await;

    assert!(result.is_err());
    let session = store.retrieve("chat-2").unwrap().unwrap();
    assert!(session.messages.is_empty());
    assert_eq!(session.metadata["user"], "bo");
}
