//! End-to-end tests of the orchestration loop against a scripted model,
//! read back through the consumer-side session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use toolwire::frame::writer::FrameWriter;
use toolwire::frame::FinishReason;
use toolwire::invocation::session::GenerationSession;
use toolwire::invocation::InvocationStatus;
use toolwire::marker::MarkerEvent;
use toolwire::model::scripted::{ScriptedBackend, ScriptedRound};
use toolwire::model::{ChatMessage, Role};
use toolwire::orchestrator::{Orchestrator, TurnContext};

use super::test_helpers::{call, run_turn_collect, test_orchestrator_config, FakeTools};

// ── Plain generation ────────────────────────────────────────

#[tokio::test]
async fn prose_only_turn_finishes_with_stop() {
    let model = Arc::new(ScriptedBackend::from_deltas([vec!["Crabs ", "are ", "crustaceans."]]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 16).await;

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.tool_rounds, 0);
    let view = session.view();
    assert_eq!(view.text, "Crabs are crustaceans.");
    assert!(view.invocations.is_empty());
    assert_eq!(view.finish_reason, Some(FinishReason::Stop));
}

// ── Successful tool round ───────────────────────────────────

#[tokio::test]
async fn tool_round_streams_declaration_events_and_result() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec![
            "Let me look that up. ".to_owned(),
            call("search", "exa", &json!({"query": "crabs"})),
            "this text is never reached".to_owned(),
        ],
        vec!["Found one page about crabs.".to_owned()],
    ]));
    let (outcome, session) = run_turn_collect(model.clone(), test_orchestrator_config(), 10).await;

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(outcome.invocations.len(), 1);
    assert_eq!(outcome.invocations[0].status, InvocationStatus::Completed);

    let view = session.view();
    assert_eq!(view.text, "Let me look that up. Found one page about crabs.");
    assert_eq!(view.invocations.len(), 1);
    let inv = &view.invocations[0];
    assert_eq!(inv.id, outcome.invocations[0].id, "both sides agree on the id");
    assert_eq!(inv.tool, "search");
    assert_eq!(inv.server, "exa");
    assert_eq!(inv.status, InvocationStatus::Completed);
    assert_eq!(inv.result, Some(json!({"hits": 1})));
    assert_eq!(inv.arguments["query"], "crabs");

    assert_eq!(view.events.len(), 1);
    assert!(matches!(view.events[0], MarkerEvent::SearchResults(_)));

    let echoes = session.tool_call_echoes();
    assert_eq!(echoes.len(), 1);
    let echo: serde_json::Value = serde_json::from_str(&echoes[0]).expect("echo json");
    assert_eq!(echo["id"], inv.id.as_str());
    assert_eq!(echo["tool"], "search");
}

#[tokio::test]
async fn tool_exchange_and_analysis_instruction_reach_the_next_round() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec![call("echo", "local", &json!({"value": 42}))],
        vec!["The value is 42.".to_owned()],
    ]));
    let config = test_orchestrator_config();
    let instruction = config.analysis_instruction.clone();
    let _ = run_turn_collect(model.clone(), config, 100).await;

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0][0].role, Role::System);

    let second = &requests[1];
    let last = second.last().expect("messages");
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, instruction);
    assert!(second
        .iter()
        .any(|m| m.role == Role::Assistant && m.content.contains("<tool_call>")));
    assert!(second.iter().any(|m| m.content.contains("42")));
}

// ── Prose that looks like markup ────────────────────────────

async fn assert_tag_literal_stays_prose(first_round: Vec<String>) {
    let model = Arc::new(ScriptedBackend::from_deltas([
        first_round,
        vec!["After the tool.".to_owned()],
    ]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 12).await;

    assert_eq!(outcome.invocations.len(), 1);
    assert_eq!(outcome.invocations[0].status, InvocationStatus::Completed);

    let view = session.view();
    assert_eq!(view.invocations.len(), 1);
    assert_eq!(view.invocations[0].id, outcome.invocations[0].id);
    assert_eq!(view.invocations[0].status, InvocationStatus::Completed);
    assert_eq!(view.invocations[0].result, Some(json!({"q": 1})));
    assert!(!view.text.contains("<!--"));
    assert_eq!(
        view.text.replace('\u{200B}', ""),
        "HTML comments like <!--tool:completed--> are neat. After the tool."
    );
}

#[tokio::test]
async fn tag_literal_in_prose_keeps_the_tool_lifecycle() {
    assert_tag_literal_stays_prose(vec![
        "HTML comments like <!--tool:completed--> are neat. ".to_owned(),
        call("echo", "local", &json!({"q": 1})),
    ])
    .await;
}

#[tokio::test]
async fn tag_literal_split_across_deltas_is_still_neutralized() {
    assert_tag_literal_stays_prose(vec![
        "HTML comments like <!".to_owned(),
        "-".to_owned(),
        "-tool:completed--> are neat. ".to_owned(),
        call("echo", "local", &json!({"q": 1})),
    ])
    .await;
}

// ── Scenario C ──────────────────────────────────────────────

#[tokio::test]
async fn tool_failure_becomes_failed_block_and_prose_continues() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec![call("broken", "exa", &json!({}))],
        vec!["Sorry, the search is unavailable right now.".to_owned()],
    ]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 8).await;

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    let view = session.view();
    assert_eq!(view.invocations.len(), 1);
    assert_eq!(view.invocations[0].status, InvocationStatus::Failed);
    assert_eq!(view.invocations[0].error.as_deref(), Some("rate limited"));
    assert_eq!(view.text, "Sorry, the search is unavailable right now.");
    assert!(view.errors.is_empty(), "a tool failure is not a stream error");
}

// ── Timeouts, limits and malformed calls ────────────────────

#[tokio::test]
async fn slow_tool_is_failed_after_the_timeout() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec![call("slow", "exa", &json!({}))],
        vec!["It took too long.".to_owned()],
    ]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 100).await;

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    let inv = &session.view().invocations[0];
    assert_eq!(inv.status, InvocationStatus::Failed);
    assert_eq!(inv.error.as_deref(), Some("tool timed out after 1s"));
}

#[tokio::test]
async fn tool_round_limit_ends_the_turn() {
    let round = || vec![call("echo", "local", &json!({}))];
    let model = Arc::new(ScriptedBackend::from_deltas([round(), round(), round(), round()]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 100).await;

    assert_eq!(outcome.finish_reason, FinishReason::ToolLimit);
    assert_eq!(outcome.tool_rounds, 3);
    let view = session.view();
    assert_eq!(view.invocations.len(), 3);
    assert!(view
        .invocations
        .iter()
        .all(|inv| inv.status == InvocationStatus::Completed));
    assert_eq!(view.errors, vec!["tool round limit of 3 reached".to_owned()]);
    assert_eq!(view.finish_reason, Some(FinishReason::ToolLimit));
}

#[tokio::test]
async fn malformed_call_is_declared_and_failed() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec!["<tool_call>{\"tool\":\"search\",\"server\":\"exa\",\"arguments\":7}</tool_call>"],
        vec!["Let me try again later."],
    ]));
    let (_, session) = run_turn_collect(model, test_orchestrator_config(), 100).await;

    let view = session.view();
    assert_eq!(view.invocations.len(), 1);
    let inv = &view.invocations[0];
    assert_eq!((inv.tool.as_str(), inv.server.as_str()), ("search", "exa"));
    assert_eq!(inv.status, InvocationStatus::Failed);
    assert!(inv
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("malformed tool call")));
    assert!(session.tool_call_echoes().is_empty(), "nothing was executed");
}

#[tokio::test]
async fn unterminated_call_at_end_of_round_still_runs() {
    let model = Arc::new(ScriptedBackend::from_deltas([
        vec!["<tool_call>{\"tool\":\"echo\",\"server\":\"local\",\"arguments\":{\"a\":1}}"],
        vec!["Done."],
    ]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 100).await;

    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(
        session.view().invocations[0].status,
        InvocationStatus::Completed
    );
    assert_eq!(session.view().text, "Done.");
}

// ── Model failures ──────────────────────────────────────────

#[tokio::test]
async fn model_failure_mid_stream_is_an_error_frame() {
    let model = Arc::new(ScriptedBackend::new([ScriptedRound::Fails {
        deltas: vec!["Partial answer".into()],
        error: "overloaded".into(),
    }]));
    let (outcome, session) = run_turn_collect(model, test_orchestrator_config(), 100).await;

    assert_eq!(outcome.finish_reason, FinishReason::Error);
    let view = session.view();
    assert_eq!(view.text, "Partial answer");
    assert_eq!(view.errors, vec!["model: overloaded".to_owned()]);
    assert_eq!(view.finish_reason, Some(FinishReason::Error));
}

// ── Cancellation ────────────────────────────────────────────

fn direct_orchestrator(model: Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::new(test_orchestrator_config(), model, Arc::new(FakeTools))
}

#[tokio::test]
async fn cancelled_token_ends_turn_with_cancelled_finish() {
    let orchestrator = direct_orchestrator(Arc::new(ScriptedBackend::from_deltas([vec!["never"]])));
    let (writer, mut frames) = FrameWriter::channel(100, 8);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut ctx = TurnContext::new("cancel-1", "", [ChatMessage::user("hi")]);
    let outcome = orchestrator.run_turn(&mut ctx, &writer, &cancel).await;
    drop(writer);
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);

    let mut session = GenerationSession::new();
    while let Some(line) = frames.recv().await {
        session.push_chunk(&line).expect("push");
    }
    assert_eq!(session.view().text, "");
    assert_eq!(session.view().finish_reason, Some(FinishReason::Cancelled));
}

#[tokio::test]
async fn dropped_consumer_abandons_a_running_tool() {
    let model = Arc::new(ScriptedBackend::from_deltas([vec![call("slow", "exa", &json!({}))]]));
    let orchestrator = direct_orchestrator(model);
    let (writer, mut frames) = FrameWriter::channel(1000, 64);

    let turn = tokio::spawn(async move {
        let mut ctx = TurnContext::new("cancel-2", "", [ChatMessage::user("hi")]);
        orchestrator
            .run_turn(&mut ctx, &writer, &CancellationToken::new())
            .await
    });

    // Wait for the `9:` echo, then hang up while the tool is still running.
    while let Some(line) = frames.recv().await {
        if line.starts_with(b"9:") {
            break;
        }
    }
    drop(frames);

    let outcome = tokio::time::timeout(Duration::from_millis(500), turn)
        .await
        .expect("turn stops before the tool timeout")
        .expect("turn task");
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);
    assert!(outcome.invocations.is_empty(), "the tool never resolved");
}
