//! Tool-call detection in streamed model output.
//!
//! The model requests a tool by writing
//! `<tool_call>{"tool": .., "server": .., "arguments": {..}}</tool_call>`.
//! [`ToolCallDetector`] watches the deltas as they arrive, passes ordinary
//! text through and holds back anything that could still turn into the
//! opening tag, so the pattern never reaches the stream as prose. A
//! trailing partial `<!--` is held back too, so the writer always sees a
//! marker-tag prefix whole and can neutralize it.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::marker::TAG_PREFIX;
use crate::{AppError, Result};

/// Opening tag of a model-side tool call.
pub const CALL_OPEN: &str = "<tool_call>";
/// Closing tag of a model-side tool call.
pub const CALL_CLOSE: &str = "</tool_call>";

/// Output of the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detected {
    /// Prose safe to forward.
    Text(String),
    /// Raw text between the call tags.
    Call(String),
}

/// Incremental splitter of prose and tool calls.
#[derive(Debug, Default)]
pub struct ToolCallDetector {
    pending: String,
    in_call: bool,
}

impl ToolCallDetector {
    /// Fresh detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta.
    pub fn push(&mut self, delta: &str) -> Vec<Detected> {
        self.pending.push_str(delta);
        let mut out = Vec::new();

        loop {
            if self.in_call {
                let Some(end) = self.pending.find(CALL_CLOSE) else {
                    break;
                };
                let raw = self.pending[..end].to_owned();
                self.pending.drain(..end + CALL_CLOSE.len());
                self.in_call = false;
                out.push(Detected::Call(raw));
            } else if let Some(start) = self.pending.find(CALL_OPEN) {
                if start > 0 {
                    out.push(Detected::Text(self.pending[..start].to_owned()));
                }
                self.pending.drain(..start + CALL_OPEN.len());
                self.in_call = true;
            } else {
                let keep = partial_suffix_len(&self.pending, CALL_OPEN)
                    .max(partial_suffix_len(&self.pending, TAG_PREFIX));
                let emit = self.pending.len() - keep;
                if emit > 0 {
                    out.push(Detected::Text(self.pending[..emit].to_owned()));
                    self.pending.drain(..emit);
                }
                break;
            }
        }

        out
    }

    /// Flush at end of generation.
    ///
    /// An unterminated call is still reported: providers configured with
    /// the closing tag as a stop sequence never send it.
    pub fn finish(&mut self) -> Option<Detected> {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.in_call) {
            Some(Detected::Call(rest))
        } else if rest.is_empty() {
            None
        } else {
            Some(Detected::Text(rest))
        }
    }

    /// `true` while inside an open call.
    #[must_use]
    pub fn in_call(&self) -> bool {
        self.in_call
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_suffix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallSpec {
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Call arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Parse the raw text of a call.
///
/// # Errors
///
/// Returns [`AppError::ToolExecution`] describing why the call is unusable;
/// the message is shown to the user as the failure reason.
pub fn parse_declaration(raw: &str) -> Result<ToolCallSpec> {
    let spec: ToolCallSpec = serde_json::from_str(raw.trim())
        .map_err(|e| AppError::ToolExecution(format!("malformed tool call: {e}")))?;
    if spec.tool.is_empty() || spec.server.is_empty() {
        return Err(AppError::ToolExecution(
            "malformed tool call: tool and server must not be empty".into(),
        ));
    }
    Ok(spec)
}

/// Best-effort `(tool, server)` from a call that failed to parse.
#[must_use]
pub fn salvage_names(raw: &str) -> (String, String) {
    let value: Value = serde_json::from_str(raw.trim()).unwrap_or(Value::Null);
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_owned()
    };
    (field("tool"), field("server"))
}
