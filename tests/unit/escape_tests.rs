//! Unit tests for the escape/chunk codec.

use toolwire::codec::{chunk, escape, reassemble, unescape, DEFAULT_CHUNK_SIZE};

#[test]
fn escape_touches_only_backslash_and_quote() {
    let raw = "line1\nline2\t\"quoted\" C:\\path";
    let escaped = escape(raw);
    assert_eq!(escaped, "line1\nline2\t\\\"quoted\\\" C:\\\\path");
    assert!(escaped.contains('\n'), "control characters must pass through");
}

#[test]
fn unescape_is_exact_inverse_of_escape() {
    let samples = [
        "",
        "plain",
        "\\",
        "\"",
        "\\\"",
        "\\\\\"\"",
        "ends with backslash \\",
        "{\"a\":\"b\\\\c\"}",
        "ünïcödé \"ok\" \\n literal",
    ];
    for sample in samples {
        assert_eq!(unescape(&escape(sample)), sample, "sample: {sample:?}");
    }
}

#[test]
fn double_escaped_text_does_not_round_trip_with_one_unescape() {
    let json = r#"{"k":"v"}"#;
    let twice = escape(&escape(json));
    let once_undone = unescape(&twice);
    assert_ne!(once_undone, json);
    assert!(serde_json::from_str::<serde_json::Value>(&once_undone).is_err());
}

#[test]
fn chunk_splits_into_fixed_size_pieces() {
    let text = "a".repeat(250);
    let pieces = chunk(&text, DEFAULT_CHUNK_SIZE);
    let lengths: Vec<usize> = pieces.iter().map(String::len).collect();
    assert_eq!(lengths, vec![100, 100, 50]);
    assert_eq!(reassemble(&pieces), text);
}

#[test]
fn chunk_counts_characters_not_bytes() {
    let text = "é".repeat(5);
    let pieces = chunk(&text, 2);
    assert_eq!(pieces, vec!["éé", "éé", "é"]);
}

#[test]
fn chunk_of_empty_text_yields_nothing() {
    assert!(chunk("", 10).is_empty());
    assert_eq!(reassemble::<String>(&[]), "");
}

#[test]
fn chunk_size_zero_disables_splitting() {
    assert_eq!(chunk("abcdef", 0), vec!["abcdef"]);
}
