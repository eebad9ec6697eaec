//! Frame reader.
//!
//! Two shapes of the same streaming line splitter:
//!
//! - [`FrameReader`]: push-based, for event-driven consumers that are
//!   handed one chunk at a time (chunks never align with line boundaries).
//! - [`run_reader`]: an async task driving a [`FramedRead`] over any
//!   [`AsyncRead`] and forwarding frames through a tokio [`mpsc`] channel.

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::FrameCodec;
use super::Frame;
use crate::Result;

/// Incremental line splitter: buffers partial lines across pushes.
#[derive(Debug, Default)]
pub struct FrameReader {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl FrameReader {
    /// Create a reader with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            codec: FrameCodec::with_max_line_bytes(max_line_bytes),
            buffer: BytesMut::new(),
        }
    }

    /// Append `chunk` and return every frame whose line is now complete.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) only for codec-level
    /// I/O failures; malformed lines are skipped, not returned as errors.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Flush a trailing unterminated line once the stream has ended.
    ///
    /// # Errors
    ///
    /// Same as [`FrameReader::push`].
    pub fn finish(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode_eof(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes buffered while waiting for a line terminator.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Lines skipped so far because they were malformed.
    #[must_use]
    pub fn skipped_malformed(&self) -> u64 {
        self.codec.skipped_malformed()
    }

    /// Lines discarded so far for exceeding the length limit.
    #[must_use]
    pub fn skipped_oversized(&self) -> u64 {
        self.codec.skipped_oversized()
    }
}

/// Frame reader task: decodes frames from `source` and sends them on `frame_tx`.
///
/// Exits cleanly on EOF, when `cancel` fires, or when the receiving side of
/// `frame_tx` is dropped. Malformed lines never end the task.
///
/// # Errors
///
/// Returns [`AppError::Io`](crate::AppError::Io) when the underlying stream
/// fails.
pub async fn run_reader<R>(
    session_id: String,
    source: R,
    max_line_bytes: usize,
    frame_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, FrameCodec::with_max_line_bytes(max_line_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "frame reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "frame reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(session_id, error = %err, "frame reader: IO error, stopping");
                        return Err(err);
                    }
                    Some(Ok(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            debug!(session_id, "frame reader: frame_tx closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    let codec = framed.decoder();
    if codec.skipped_malformed() > 0 || codec.skipped_oversized() > 0 {
        warn!(
            session_id,
            malformed = codec.skipped_malformed(),
            oversized = codec.skipped_oversized(),
            "frame reader: lines were skipped during this turn"
        );
    }

    Ok(())
}
