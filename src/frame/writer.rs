//! Frame writer.
//!
//! [`FrameWriter`] is the producer half of one turn's stream. Every write
//! serializes a whole [`Frame`] to a line and sends the bytes through a
//! bounded tokio [`mpsc`] channel; the transport drains the receiver into
//! the response body. Marker blocks are written as ordinary text frames,
//! one frame per tag and per payload piece, so that no single line grows
//! with the payload.
//!
//! Assistant prose is written with every `<!--` broken up, and split so
//! that each line stays within the line limit the consumer enforces.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::codec::MAX_LINE_BYTES;
use super::{FinishReason, Frame};
use crate::codec::chunk;
use crate::marker::encode::{encode_pieces, neutralize_tags};
use crate::marker::MarkerEvent;
use crate::{AppError, Result};

/// Bytes a text line adds around its payload: `0:`, two quotes, newline.
const TEXT_LINE_OVERHEAD: usize = 5;

/// Longest JSON rendering of one `char` inside a string literal (`\u001f`).
const MAX_ENCODED_CHAR_BYTES: usize = 6;

/// Producer-side handle for one turn's frame stream.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Bytes>,
    chunk_size: usize,
    max_line_bytes: usize,
}

impl FrameWriter {
    /// Create a writer and the receiver its lines are delivered to.
    ///
    /// Lines are limited to [`MAX_LINE_BYTES`] until
    /// [`FrameWriter::with_max_line_bytes`] says otherwise.
    #[must_use]
    pub fn channel(chunk_size: usize, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = Self {
            tx,
            chunk_size,
            max_line_bytes: MAX_LINE_BYTES,
        };
        (writer, rx)
    }

    /// Use the consumer's line limit, newline excluded.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Line limit in effect.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Characters of text that always fit on one line.
    fn text_budget(&self) -> usize {
        (self.max_line_bytes.saturating_sub(TEXT_LINE_OVERHEAD) / MAX_ENCODED_CHAR_BYTES).max(1)
    }

    /// Piece size used when splitting marker payloads.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `true` once the consumer has dropped the receiving side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped the receiving side.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Serialize and send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::FrameMalformed`] when the line would exceed the
    /// line limit, or [`AppError::Cancelled`] when the consumer is gone.
    pub async fn write(&self, frame: &Frame) -> Result<()> {
        let line = frame.encode_line()?;
        let len = line.len() - 1;
        if len > self.max_line_bytes {
            warn!(
                code = %frame.frame_type.code(),
                bytes = len,
                max_line_bytes = self.max_line_bytes,
                "frame writer: line over limit, not sent"
            );
            return Err(AppError::FrameMalformed(format!(
                "{len} byte line exceeds the {} byte limit",
                self.max_line_bytes
            )));
        }
        trace!(code = %frame.frame_type.code(), bytes = line.len(), "frame writer: line");
        self.tx
            .send(Bytes::from(line))
            .await
            .map_err(|_| AppError::Cancelled("stream consumer disconnected".into()))
    }

    /// Send assistant prose; empty text is not written.
    ///
    /// Marker-tag prefixes are neutralized, and text too long for one line
    /// goes out as several frames.
    ///
    /// # Errors
    ///
    /// Same as [`FrameWriter::write`].
    pub async fn text(&self, text: &str) -> Result<()> {
        for piece in chunk(&neutralize_tags(text), self.text_budget()) {
            self.write(&Frame::text(piece)).await?;
        }
        Ok(())
    }

    /// Encode `event` as a marker block and send it as text frames.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Marker`] if the payload cannot be encoded, or
    /// [`AppError::Cancelled`] when the consumer is gone.
    pub async fn marker(&self, event: &MarkerEvent) -> Result<()> {
        let piece_size = match self.chunk_size {
            0 => self.text_budget(),
            size => size.min(self.text_budget()),
        };
        for piece in encode_pieces(event, piece_size)? {
            self.write(&Frame::text(piece)).await?;
        }
        Ok(())
    }

    /// Echo a declared tool call as a `9:` frame.
    ///
    /// # Errors
    ///
    /// Same as [`FrameWriter::write`].
    pub async fn tool_call_echo(&self, declaration_json: &str) -> Result<()> {
        self.write(&Frame::tool_call_echo(declaration_json)).await
    }

    /// Send a stream error message.
    ///
    /// # Errors
    ///
    /// Same as [`FrameWriter::write`].
    pub async fn error(&self, message: &str) -> Result<()> {
        self.write(&Frame::error(message)).await
    }

    /// Terminate the turn with `reason`.
    ///
    /// # Errors
    ///
    /// Same as [`FrameWriter::write`].
    pub async fn finish(&self, reason: FinishReason) -> Result<()> {
        self.write(&Frame::finish(reason)).await
    }
}
