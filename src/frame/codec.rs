//! Line codec for the frame stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length. Unlike a plain line codec it never surfaces per-line problems as
//! decoder errors: a decoder error ends a [`FramedRead`](tokio_util::codec::FramedRead)
//! stream, and one bad line must not cost the rest of the turn. Malformed and
//! oversized lines are logged, counted, and skipped.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::Frame;
use crate::{AppError, Result};

/// Default maximum line length accepted by the decoder: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Decoder/encoder for `<typeCode>:<string-literal>\n` lines.
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
    max_line_bytes: usize,
    skipped_malformed: u64,
    skipped_oversized: u64,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
            skipped_malformed: 0,
            skipped_oversized: 0,
        }
    }

    /// Number of lines skipped because they did not parse as frames.
    #[must_use]
    pub fn skipped_malformed(&self) -> u64 {
        self.skipped_malformed
    }

    /// Number of lines discarded for exceeding the length limit.
    #[must_use]
    pub fn skipped_oversized(&self) -> u64 {
        self.skipped_oversized
    }

    /// Shared decode loop for [`Decoder::decode`] and [`Decoder::decode_eof`].
    fn decode_with(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<Frame>> {
        loop {
            let next = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };

            match next {
                Ok(None) => return Ok(None),
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        debug!("frame codec: skipping empty line");
                        continue;
                    }
                    match Frame::parse_line(&line) {
                        Ok(frame) => return Ok(Some(frame)),
                        Err(err) => {
                            self.skipped_malformed += 1;
                            warn!(
                                error = %err,
                                raw_line = %truncate(&line, 120),
                                "frame codec: skipping malformed line"
                            );
                        }
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // LinesCodec now discards input up to the next newline.
                    self.skipped_oversized += 1;
                    warn!(
                        max_line_bytes = self.max_line_bytes,
                        "frame codec: line too long, discarding"
                    );
                }
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    // The offending line has already been consumed.
                    self.skipped_malformed += 1;
                    warn!(error = %err, "frame codec: skipping non-UTF-8 line");
                }
                Err(LinesCodecError::Io(err)) => return Err(AppError::Io(err.to_string())),
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decode_with(src, false)
    }

    /// Decode the final, possibly unterminated, line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decode_with(src, true)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let line = item.encode_line()?;
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    line.chars().take(max_chars).collect()
}
