//! Unit tests for tool-call detection in streamed model output.

use toolwire::orchestrator::detector::{
    parse_declaration, salvage_names, Detected, ToolCallDetector,
};
use toolwire::AppError;

fn run(deltas: &[&str]) -> Vec<Detected> {
    let mut detector = ToolCallDetector::new();
    let mut out: Vec<Detected> = deltas.iter().flat_map(|d| detector.push(d)).collect();
    out.extend(detector.finish());
    out
}

fn joined_text(items: &[Detected]) -> String {
    items
        .iter()
        .filter_map(|d| match d {
            Detected::Text(t) => Some(t.as_str()),
            Detected::Call(_) => None,
        })
        .collect()
}

#[test]
fn plain_text_passes_through() {
    let out = run(&["Hello, ", "world."]);
    assert_eq!(joined_text(&out), "Hello, world.");
    assert!(out.iter().all(|d| matches!(d, Detected::Text(_))));
}

#[test]
fn call_split_across_deltas_is_detected() {
    let out = run(&[
        "Let me check. <to",
        "ol_call>{\"tool\":\"search\",",
        "\"server\":\"exa\",\"arguments\":{}}</tool",
        "_call>",
    ]);
    assert_eq!(
        out,
        vec![
            Detected::Text("Let me check. ".into()),
            Detected::Call("{\"tool\":\"search\",\"server\":\"exa\",\"arguments\":{}}".into()),
        ]
    );
}

#[test]
fn partial_open_tag_is_held_back_then_released() {
    let mut detector = ToolCallDetector::new();
    assert_eq!(detector.push("a <tool"), vec![Detected::Text("a ".into())]);
    assert_eq!(detector.push("box"), vec![Detected::Text("<toolbox".into())]);
    assert!(detector.finish().is_none());
}

#[test]
fn lone_angle_bracket_at_end_is_flushed_on_finish() {
    let out = run(&["x < y and y <"]);
    assert_eq!(joined_text(&out), "x < y and y <");
}

#[test]
fn unterminated_call_is_reported_on_finish() {
    let mut detector = ToolCallDetector::new();
    let _ = detector.push("<tool_call>{\"tool\":\"t\",\"server\":\"s\"}");
    assert!(detector.in_call());
    assert_eq!(
        detector.finish(),
        Some(Detected::Call("{\"tool\":\"t\",\"server\":\"s\"}".into()))
    );
}

#[test]
fn text_after_call_is_still_emitted() {
    let out = run(&["<tool_call>{}</tool_call> after"]);
    assert_eq!(
        out,
        vec![Detected::Call("{}".into()), Detected::Text(" after".into())]
    );
}

#[test]
fn declaration_parses_arguments() {
    let spec = parse_declaration(
        r#" {"tool":"search","server":"exa","arguments":{"query":"rust","limit":5}} "#,
    )
    .expect("parse");
    assert_eq!(spec.tool, "search");
    assert_eq!(spec.server, "exa");
    assert_eq!(spec.arguments["limit"], 5);
}

#[test]
fn missing_arguments_default_to_empty() {
    let spec = parse_declaration(r#"{"tool":"t","server":"s"}"#).expect("parse");
    assert!(spec.arguments.is_empty());
}

#[test]
fn malformed_declarations_are_tool_errors() {
    let cases = [
        "not json",
        r#"{"tool":"t"}"#,
        r#"{"tool":"t","server":"s","arguments":[1,2]}"#,
        r#"{"tool":"t","server":"s","extra":true}"#,
        r#"{"tool":"","server":"s"}"#,
    ];
    for raw in cases {
        let err = parse_declaration(raw).expect_err(raw);
        match err {
            AppError::ToolExecution(msg) => assert!(msg.starts_with("malformed tool call"), "{msg}"),
            other => panic!("unexpected error for {raw}: {other}"),
        }
    }
}

#[test]
fn salvage_keeps_whatever_names_are_present() {
    assert_eq!(
        salvage_names(r#"{"tool":"t","server":"s","arguments":"oops"}"#),
        ("t".to_owned(), "s".to_owned())
    );
}

#[test]
fn partial_marker_tag_prefix_is_held_back() {
    let mut detector = ToolCallDetector::new();
    assert_eq!(detector.push("see <!-"), vec![Detected::Text("see ".into())]);
    assert_eq!(
        detector.push("-tool:failed-->"),
        vec![Detected::Text("<!--tool:failed-->".into())]
    );
}
