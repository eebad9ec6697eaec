//! Consumer-side view model for one assistant turn.
//!
//! [`GenerationSession`] owns the turn's cumulative text and re-derives
//! everything else from it after each update: prose, tool invocations and
//! non-tool events. Nothing is patched incrementally, so applying the same
//! bytes split at different chunk boundaries always converges on the same
//! view.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{derive_from_blocks, ToolInvocation};
use crate::frame::reader::FrameReader;
use crate::frame::{FinishReason, Frame, FrameType};
use crate::marker::decode::{decode_all, strip_markers};
use crate::marker::MarkerEvent;
use crate::Result;

/// Read-only snapshot handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    /// Prose with marker blocks removed.
    pub text: String,
    /// Tool invocations in declaration order.
    pub invocations: Vec<ToolInvocation>,
    /// Search, media and options events in order of appearance.
    pub events: Vec<MarkerEvent>,
    /// Error frames received during the turn.
    pub errors: Vec<String>,
    /// Finish reason, once the turn has ended.
    pub finish_reason: Option<FinishReason>,
    /// Whether the consumer abandoned the turn.
    pub cancelled: bool,
}

/// State for one in-flight assistant response.
#[derive(Debug)]
pub struct GenerationSession {
    id: Uuid,
    reader: FrameReader,
    cumulative_text: String,
    view: MessageView,
    tool_call_echoes: Vec<String>,
    reported_failures: HashSet<usize>,
}

impl GenerationSession {
    /// Start a session with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reader(FrameReader::new())
    }

    /// Start a session with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self::with_reader(FrameReader::with_max_line_bytes(max_line_bytes))
    }

    fn with_reader(reader: FrameReader) -> Self {
        Self {
            id: Uuid::new_v4(),
            reader,
            cumulative_text: String::new(),
            view: MessageView {
                text: String::new(),
                invocations: Vec::new(),
                events: Vec::new(),
                errors: Vec::new(),
                finish_reason: None,
                cancelled: false,
            },
            tool_call_echoes: Vec::new(),
            reported_failures: HashSet::new(),
        }
    }

    /// Session id, for log correlation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Feed one raw chunk from the transport.
    ///
    /// Returns `true` when the chunk completed at least one frame. Chunks
    /// received after cancellation or after the finish frame are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) only for codec-level
    /// I/O failures; malformed lines and blocks are skipped.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<bool> {
        if self.is_closed() {
            debug!(session_id = %self.id, "session: chunk after close ignored");
            return Ok(false);
        }
        let frames = self.reader.push(chunk)?;
        Ok(self.apply_frames(frames))
    }

    /// Flush a trailing unterminated line once the transport has closed.
    ///
    /// # Errors
    ///
    /// Same as [`GenerationSession::push_chunk`].
    pub fn end_of_stream(&mut self) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let frames = self.reader.finish()?;
        Ok(self.apply_frames(frames))
    }

    /// Apply frames already split by a reader task.
    pub fn apply_frames(&mut self, frames: impl IntoIterator<Item = Frame>) -> bool {
        let mut text_changed = false;
        let mut any = false;

        for frame in frames {
            if self.is_closed() {
                break;
            }
            any = true;
            match frame.frame_type {
                FrameType::TextDelta => {
                    self.cumulative_text.push_str(&frame.payload);
                    text_changed = true;
                }
                FrameType::ToolCallEcho => self.tool_call_echoes.push(frame.payload),
                FrameType::Error => {
                    warn!(session_id = %self.id, message = %frame.payload, "session: error frame");
                    self.view.errors.push(frame.payload);
                }
                FrameType::Finish => {
                    let reason = FinishReason::parse(&frame.payload).unwrap_or_else(|| {
                        warn!(
                            session_id = %self.id,
                            reason = %frame.payload,
                            "session: unknown finish reason"
                        );
                        FinishReason::Error
                    });
                    self.view.finish_reason = Some(reason);
                }
            }
        }

        if text_changed {
            self.refresh();
        }
        any
    }

    /// Abandon the turn: later chunks are ignored and any block still
    /// missing its close tag is never decoded.
    pub fn cancel(&mut self) {
        if !self.view.cancelled {
            debug!(session_id = %self.id, buffered = self.reader.buffered_len(), "session: cancelled");
            self.view.cancelled = true;
        }
    }

    /// `true` once finished or cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.view.cancelled || self.view.finish_reason.is_some()
    }

    /// Current snapshot.
    #[must_use]
    pub fn view(&self) -> &MessageView {
        &self.view
    }

    /// Raw cumulative text, marker blocks included.
    #[must_use]
    pub fn cumulative_text(&self) -> &str {
        &self.cumulative_text
    }

    /// Declaration JSON echoed in `9:` frames, in arrival order.
    #[must_use]
    pub fn tool_call_echoes(&self) -> &[String] {
        &self.tool_call_echoes
    }

    /// Lines skipped by the frame reader as malformed or oversized.
    #[must_use]
    pub fn skipped_lines(&self) -> u64 {
        self.reader.skipped_malformed() + self.reader.skipped_oversized()
    }

    /// Blocks in the current text that failed to decode.
    #[must_use]
    pub fn failed_blocks(&self) -> usize {
        self.reported_failures.len()
    }

    fn refresh(&mut self) {
        let blocks = decode_all(&self.cumulative_text);
        for block in &blocks {
            if let Err(err) = &block.result {
                // Offsets never move, so each bad block is reported once.
                if self.reported_failures.insert(block.span.start) {
                    warn!(
                        session_id = %self.id,
                        kind = block.kind.name(),
                        offset = block.span.start,
                        error = %err,
                        "session: discarding undecodable marker block"
                    );
                }
            }
        }
        self.view.invocations = derive_from_blocks(&blocks);
        self.view.events = blocks
            .into_iter()
            .filter_map(|block| block.result.ok())
            .filter(|event| !event.is_tool_lifecycle())
            .collect();
        self.view.text = strip_markers(&self.cumulative_text);
    }
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}
