//! Line-framed wire protocol for one chat turn.
//!
//! Every frame is one line: `<typeCode>:<string-literal>\n`. The payload is
//! always a JSON string literal produced by a single `serde_json`
//! serialization of the raw payload, never assembled from pre-escaped
//! fragments.
//!
//! Submodules:
//! - `codec`: [`FrameCodec`](codec::FrameCodec), a
//!   [`LinesCodec`](tokio_util::codec::LinesCodec)-backed decoder/encoder that
//!   skips malformed and oversized lines instead of failing the stream.
//! - `reader`: incremental [`FrameReader`](reader::FrameReader) for
//!   per-chunk consumers plus the async `run_reader` task.
//! - `writer`: [`FrameWriter`](writer::FrameWriter), the producer-side
//!   handle the orchestration loop writes text, markers and finish frames to.

pub mod codec;
pub mod reader;
pub mod writer;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Closed set of frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Assistant text; may carry marker blocks (`0`).
    TextDelta,
    /// JSON text of a declared tool call, echoed for observers (`9`).
    ToolCallEcho,
    /// Human-readable stream error (`3`).
    Error,
    /// Finish reason terminating the turn (`d`).
    Finish,
}

impl FrameType {
    /// Single-character wire code.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::TextDelta => '0',
            Self::ToolCallEcho => '9',
            Self::Error => '3',
            Self::Finish => 'd',
        }
    }

    /// Look up a frame type from its wire code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::TextDelta),
            "9" => Some(Self::ToolCallEcho),
            "3" => Some(Self::Error),
            "d" => Some(Self::Finish),
            _ => None,
        }
    }
}

/// Why a turn ended; carried as the payload of a [`FrameType::Finish`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model finished without requesting further tools.
    Stop,
    /// The per-turn tool round limit was reached.
    ToolLimit,
    /// The turn ended on a model or transport error.
    Error,
    /// The turn was abandoned by the consumer or by shutdown.
    Cancelled,
}

impl FinishReason {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolLimit => "tool-limit",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire finish reason; unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stop" => Some(Self::Stop),
            "tool-limit" => Some(Self::ToolLimit),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl Display for FinishReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type code.
    pub frame_type: FrameType,
    /// Raw (unserialized) payload string.
    pub payload: String,
}

impl Frame {
    /// Create a frame of any type.
    pub fn new(frame_type: FrameType, payload: impl Into<String>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Assistant text delta.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(FrameType::TextDelta, payload)
    }

    /// Tool-call echo carrying the declaration JSON text.
    pub fn tool_call_echo(payload: impl Into<String>) -> Self {
        Self::new(FrameType::ToolCallEcho, payload)
    }

    /// Stream error message.
    pub fn error(payload: impl Into<String>) -> Self {
        Self::new(FrameType::Error, payload)
    }

    /// Finish frame for `reason`.
    #[must_use]
    pub fn finish(reason: FinishReason) -> Self {
        Self::new(FrameType::Finish, reason.as_str())
    }

    /// Serialize the whole frame to one `\n`-terminated line.
    ///
    /// The payload is serialized exactly once; the type code is a fixed
    /// ASCII character that needs no escaping.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::FrameMalformed`] if the payload cannot be
    /// serialized (not expected for `String`).
    pub fn encode_line(&self) -> Result<String> {
        let literal = serde_json::to_string(&self.payload)
            .map_err(|e| AppError::FrameMalformed(format!("payload serialization failed: {e}")))?;
        let mut line = String::with_capacity(literal.len() + 3);
        line.push(self.frame_type.code());
        line.push(':');
        line.push_str(&literal);
        line.push('\n');
        Ok(line)
    }

    /// Parse one line (without its trailing `\n`) into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::FrameMalformed`] when the line has no `:`
    /// separator, an unknown type code, or a payload that is not a JSON
    /// string literal.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (code, literal) = line
            .split_once(':')
            .ok_or_else(|| AppError::FrameMalformed("missing type code separator".into()))?;

        let frame_type = FrameType::from_code(code)
            .ok_or_else(|| AppError::FrameMalformed(format!("unknown type code {code:?}")))?;

        let payload: String = serde_json::from_str(literal)
            .map_err(|e| AppError::FrameMalformed(format!("payload is not a string literal: {e}")))?;

        Ok(Self {
            frame_type,
            payload,
        })
    }
}
