//! Unit tests for deriving tool invocations from cumulative text.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

use toolwire::invocation::{derive_invocations, InvocationStatus, ToolInvocation};
use toolwire::marker::encode::encode_block;
use toolwire::marker::{MarkerEvent, ToolCompleted, ToolDeclared, ToolFailed};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp")
}

fn declared(id: &str, tool: &str, server: &str, secs: i64) -> String {
    encode_block(&MarkerEvent::ToolDeclared(ToolDeclared {
        id: id.into(),
        tool: tool.into(),
        server: server.into(),
        arguments: Map::new(),
        declared_at: at(secs),
    }))
    .expect("encode")
}

fn completed(id: Option<&str>, tool: &str, server: &str, result: Value, secs: i64) -> String {
    encode_block(&MarkerEvent::ToolCompleted(ToolCompleted {
        id: id.map(str::to_owned),
        tool: tool.into(),
        server: server.into(),
        result,
        resolved_at: at(secs),
    }))
    .expect("encode")
}

fn failed(id: Option<&str>, tool: &str, server: &str, error: &str, secs: i64) -> String {
    encode_block(&MarkerEvent::ToolFailed(ToolFailed {
        id: id.map(str::to_owned),
        tool: tool.into(),
        server: server.into(),
        error: error.into(),
        resolved_at: at(secs),
    }))
    .expect("encode")
}

fn rank(status: InvocationStatus) -> u8 {
    match status {
        InvocationStatus::Declared => 0,
        InvocationStatus::Executing => 1,
        InvocationStatus::Completed | InvocationStatus::Failed => 2,
    }
}

// ── Scenario A ──────────────────────────────────────────────

#[test]
fn single_declaration_and_completion() {
    let text = format!(
        "Searching… {} Found it. {} Here is the summary.",
        declared("a1", "search", "exa", 100),
        completed(Some("a1"), "search", "exa", json!({"hits": 3}), 102),
    );

    let invocations = derive_invocations(&text);
    assert_eq!(invocations.len(), 1);
    let inv = &invocations[0];
    assert_eq!(inv.status, InvocationStatus::Completed);
    assert_eq!(inv.result.as_ref().and_then(|r| r["hits"].as_u64()), Some(3));
    assert_eq!(inv.duration(), Some(Duration::seconds(2)));
}

// ── Scenario D ──────────────────────────────────────────────

#[test]
fn duplicate_tool_pairs_resolve_in_arrival_order_without_ids() {
    let text = [
        declared("d1", "x", "y", 10),
        declared("d2", "x", "y", 11),
        completed(None, "x", "y", json!("first"), 12),
        completed(None, "x", "y", json!("second"), 13),
    ]
    .concat();

    let invocations = derive_invocations(&text);
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].id, "d1");
    assert_eq!(invocations[0].result, Some(json!("first")));
    assert_eq!(invocations[1].id, "d2");
    assert_eq!(invocations[1].result, Some(json!("second")));
}

#[test]
fn ids_pair_correctly_even_when_resolved_out_of_order() {
    let text = [
        declared("d1", "x", "y", 10),
        declared("d2", "x", "y", 11),
        completed(Some("d2"), "x", "y", json!("for d2"), 12),
        failed(Some("d1"), "x", "y", "for d1", 13),
    ]
    .concat();

    let invocations = derive_invocations(&text);
    assert_eq!(invocations[0].status, InvocationStatus::Failed);
    assert_eq!(invocations[0].error.as_deref(), Some("for d1"));
    assert_eq!(invocations[1].status, InvocationStatus::Completed);
    assert_eq!(invocations[1].result, Some(json!("for d2")));
}

// ── Scenario C (consumer side) ──────────────────────────────

#[test]
fn failure_block_sets_error_and_keeps_prose() {
    let text = format!(
        "{}{} Sorry, the search is unavailable.",
        declared("c1", "search", "exa", 0),
        failed(Some("c1"), "search", "exa", "rate limited", 1),
    );
    let invocations = derive_invocations(&text);
    assert_eq!(invocations[0].status, InvocationStatus::Failed);
    assert_eq!(invocations[0].error.as_deref(), Some("rate limited"));
    assert!(invocations[0].result.is_none());
}

// ── Edge cases ──────────────────────────────────────────────

#[test]
fn unmatched_declaration_stays_executing() {
    let text = declared("u1", "slow", "srv", 0);
    let invocations = derive_invocations(&text);
    assert_eq!(invocations[0].status, InvocationStatus::Executing);
    assert!(invocations[0].resolved_at.is_none());
}

#[test]
fn resolution_without_declaration_is_ignored() {
    let text = completed(Some("ghost"), "x", "y", json!(1), 0);
    assert!(derive_invocations(&text).is_empty());
}

#[test]
fn second_resolution_for_same_id_is_ignored() {
    let text = [
        declared("r1", "x", "y", 0),
        completed(Some("r1"), "x", "y", json!(1), 1),
        failed(Some("r1"), "x", "y", "late", 2),
    ]
    .concat();
    let invocations = derive_invocations(&text);
    assert_eq!(invocations[0].status, InvocationStatus::Completed);
    assert!(invocations[0].error.is_none());
}

#[test]
fn repeated_declaration_id_is_ignored() {
    let text = [declared("r1", "x", "y", 0), declared("r1", "x", "y", 5)].concat();
    let invocations = derive_invocations(&text);
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].declared_at, at(0));
}

#[test]
fn resolution_before_its_declaration_still_pairs() {
    // Derivation is two-pass over the whole buffer.
    let text = [
        completed(Some("p1"), "x", "y", json!(true), 5),
        declared("p1", "x", "y", 1),
    ]
    .concat();
    let invocations = derive_invocations(&text);
    assert_eq!(invocations[0].status, InvocationStatus::Completed);
}

// ── Idempotence and monotonicity ────────────────────────────

fn scenario_text() -> String {
    format!(
        "intro {} mid {} {} more {} end",
        declared("m1", "search", "exa", 0),
        completed(Some("m1"), "search", "exa", json!({"n": 1}), 1),
        declared("m2", "fetch", "web", 2),
        failed(Some("m2"), "fetch", "web", "404", 3),
    )
}

#[test]
fn derivation_is_idempotent() {
    let text = scenario_text();
    assert_eq!(derive_invocations(&text), derive_invocations(&text));
}

#[test]
fn extending_the_buffer_never_changes_resolved_invocations() {
    let text = scenario_text();
    let full = derive_invocations(&text);

    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());

    let mut previous: Vec<ToolInvocation> = Vec::new();
    for end in boundaries {
        let current = derive_invocations(&text[..end]);
        assert!(current.len() >= previous.len(), "invocations never disappear");
        for (before, after) in previous.iter().zip(&current) {
            assert_eq!(before.id, after.id, "order is stable");
            assert!(rank(after.status) >= rank(before.status), "status never regresses");
            if before.status.is_terminal() {
                assert_eq!(before, after, "resolved invocations are frozen");
            }
        }
        for (partial, whole) in current.iter().zip(&full) {
            assert_eq!(partial.id, whole.id);
        }
        previous = current;
    }
    assert_eq!(previous, full);
}
