//! Handoffs between registered agents.

mod common;

use baton_rs::agent::handoff::{HandoffContext, MAX_HANDOFF_CHAIN};
use baton_rs::error::HandoffError;
use baton_rs::prelude::*;
use common::{ScriptedProvider, init_tracing, user};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn transfer(call_id: &str, target: &str, args: serde_json::Value) -> ModelResponse {
    ModelResponse::new().with_function_call(call_id, format!("transfer_to_{target}"), args.to_string())
}

#[tokio::test]
async fn handoff_switches_the_active_agent() {
    init_tracing();
    let provider = ScriptedProvider::new(vec![
        transfer("h1", "billing", json!({"invoice_id": "INV-7", "reason": "billing question"})),
        ModelResponse::new().with_message("Invoice INV-7 refunded."),
    ]);
    let billing = Agent::new("billing", "You resolve billing questions.");
    let triage = Arc::new(
        Agent::new("triage", "Route the user.")
            .with_handoff(HandoffConfig::new("billing").with_field("invoice_id", "Invoice in question")),
    );
    let handoffs = Arc::new(Mutex::new(Vec::new()));
    let seen = handoffs.clone();

    let result = Runner::new(provider.clone())
        .with_agent(billing)
        .with_event_handler(FnEventHandler::new(move |event: &StreamEvent| {
            if let EventKind::AgentHandoff { from, to, data } = &event.kind {
                seen.lock().unwrap().push((from.clone(), to.clone(), data.clone()));
            }
        }))
        .run(&triage, &user("My invoice is wrong."))
        .await
        .unwrap();

    assert_eq!(result.last_agent.name, "billing");
    assert_eq!(result.final_text(), Some("Invoice INV-7 refunded."));
    assert_eq!(result.turns, 2);
    assert_eq!(result.handoff_chain.len(), 1);
    assert_eq!(result.handoff_chain[0].from, "triage");
    assert_eq!(result.handoff_chain[0].to, "billing");

    let recorded = handoffs.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "triage");
    assert_eq!(recorded[0].2["invoice_id"], "INV-7");

    assert!(result.new_items.contains(&ConversationItem::function_output(
        "h1",
        json!({"assistant": "billing"}).to_string()
    )));

    let requests = provider.requests();
    assert_eq!(requests[0].instructions, "Route the user.");
    assert!(requests[0].tools.iter().any(|t| t.name() == "transfer_to_billing"));
    assert_eq!(requests[1].instructions, "You resolve billing questions.");
    assert!(requests[1].tools.is_empty());
}

#[tokio::test]
async fn handing_back_to_a_previous_agent_is_circular() {
    let provider = ScriptedProvider::new(vec![
        transfer("h1", "billing", json!({})),
        transfer("h2", "triage", json!({})),
    ]);
    let billing = Agent::new("billing", "B").with_handoff(HandoffConfig::new("triage"));
    let triage = Arc::new(Agent::new("triage", "T").with_handoff(HandoffConfig::new("billing")));

    let err = Runner::new(provider)
        .with_agent(billing)
        .run(&triage, &user("help"))
        .await
        .unwrap_err();

    match err {
        RunError::Handoff(HandoffError::Circular { agent }) => assert_eq!(agent, "triage"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unknown_target_fails_the_run() {
    let provider = ScriptedProvider::new(vec![transfer("h1", "legal", json!({}))]);
    let triage = Arc::new(Agent::new("triage", "T").with_handoff(HandoffConfig::new("legal")));

    let err = Runner::new(provider).run(&triage, &user("sue them")).await.unwrap_err();

    assert!(matches!(
        err,
        RunError::Handoff(HandoffError::UnknownAgent(ref name)) if name == "legal"
    ));
}

#[tokio::test]
async fn only_the_first_handoff_in_a_response_runs() {
    let provider = ScriptedProvider::new(vec![
        transfer("h1", "billing", json!({}))
            .with_function_call("h2", "transfer_to_support", "{}")
            .with_function_call("c1", "lookup", "{}"),
        ModelResponse::new().with_message("Billing here."),
    ]);
    let triage = Arc::new(
        Agent::new("triage", "T")
            .with_handoff(HandoffConfig::new("billing"))
            .with_handoff(HandoffConfig::new("support")),
    );

    let result = Runner::new(provider)
        .with_agent(Agent::new("billing", "B"))
        .with_agent(Agent::new("support", "S"))
        .run(&triage, &user("help"))
        .await
        .unwrap();

    assert_eq!(result.last_agent.name, "billing");
    let outputs: Vec<_> = result
        .new_items
        .iter()
        .filter_map(|item| match item {
            ConversationItem::FunctionCallOutput { call_id, output } => Some((call_id.as_str(), output.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 3);
    assert!(outputs.iter().any(|(id, out)| *id == "h2" && out.contains("ignored")));
    assert!(outputs.iter().any(|(id, out)| *id == "c1" && out.starts_with("Skipped")));
}

#[tokio::test]
async fn conditional_handoff_is_hidden_until_allowed() {
    let provider = ScriptedProvider::new(vec![ModelResponse::new().with_message("no escalation")]);
    let triage = Arc::new(Agent::new("triage", "T").with_handoff(
        HandoffConfig::new("manager").with_condition(|ctx| ctx.get("vip") == Some(json!(true))),
    ));
    let runner = Runner::new(provider.clone()).with_agent(Agent::new("manager", "M"));

    runner.run(&triage, &user("hi")).await.unwrap();
    runner
        .clone()
        .with_config(RunConfig::new().with_context_value("vip", json!(true)))
        .run(&triage, &user("hi"))
        .await
        .unwrap();

    let requests = provider.requests();
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[1].tools[0].name(), "transfer_to_manager");
}

#[tokio::test]
async fn long_relays_keep_only_the_most_recent_links() {
    let hops = MAX_HANDOFF_CHAIN + 1;
    let mut script: Vec<ModelResponse> = (1..=hops)
        .map(|i| transfer(&format!("h{i}"), &format!("agent_{i}"), json!({})))
        .collect();
    script.push(ModelResponse::new().with_message("end of the line"));
    let provider = ScriptedProvider::new(script);

    let mut runner = Runner::new(provider).with_config(RunConfig::new().with_max_turns(20));
    for i in 1..=hops {
        let mut agent = Agent::new(format!("agent_{i}"), "relay");
        if i < hops {
            agent = agent.with_handoff(HandoffConfig::new(format!("agent_{}", i + 1)));
        }
        runner = runner.with_agent(agent);
    }
    let start = Arc::new(Agent::new("agent_0", "relay").with_handoff(HandoffConfig::new("agent_1")));

    let result = runner.run(&start, &user("pass it on")).await.unwrap();

    assert_eq!(result.handoff_chain.len(), MAX_HANDOFF_CHAIN);
    assert_eq!(result.handoff_chain[0].from, "agent_1");
    assert_eq!(result.handoff_chain[MAX_HANDOFF_CHAIN - 1].to, format!("agent_{hops}"));
    assert_eq!(result.last_agent.name, format!("agent_{hops}"));
}

#[test]
fn handoff_data_is_copied_on_set() {
    let mut ctx = HandoffContext::new("triage");
    let mut data = json!({"task": "x"});
    ctx.set_handoff("billing", &data, None);
    data["task"] = json!("changed");

    assert_eq!(ctx.handoff_data()["task"], "x");
    let outcome = ctx.execute_handoff().unwrap();
    assert_eq!(outcome.handoff_data["task"], "x");
}

#[test]
fn cleared_context_permits_the_same_target_again() {
    let mut ctx = HandoffContext::new("a");
    ctx.set_handoff("b", &json!({}), None);
    ctx.execute_handoff().unwrap();
    ctx.set_handoff("a", &json!({}), None);
    assert!(matches!(
        ctx.execute_handoff(),
        Err(HandoffError::Circular { ref agent }) if agent == "a"
    ));

    ctx.clear_handoff();
    ctx.set_handoff("a", &json!({}), None);
    assert!(ctx.execute_handoff().is_ok());
}
