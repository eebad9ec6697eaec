//! Marker decoder.
//!
//! Scans a cumulative text buffer for complete marker blocks. The scan is a
//! pure function of the buffer: running it again on the same text, or on a
//! longer text that extends it, reproduces the same blocks at the same
//! offsets. A block whose close tag has not arrived yet is reported as
//! incomplete and never decoded. An open tag that meets another open tag
//! before its own close tag is not a block; lexing resumes at the later tag.

use std::collections::HashSet;
use std::ops::Range;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    MarkerEvent, MarkerKind, MediaGenerationStarted, OptionsPrompt, SearchResults, ToolCompleted,
    ToolDeclared, ToolFailed, TAG_PREFIX,
};
use crate::codec::unescape;
use crate::{AppError, Result};

/// A complete `<open>...<close>` span found in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBlock<'a> {
    /// Block kind.
    pub kind: MarkerKind,
    /// Byte offset of the open tag.
    pub start: usize,
    /// Byte offset just past the close tag.
    pub end: usize,
    /// Escaped payload between the tags.
    pub inner: &'a str,
}

/// Result of lexing a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan<'a> {
    /// Complete blocks in order of appearance.
    pub blocks: Vec<RawBlock<'a>>,
    /// Kind and offset of a trailing block still waiting for its close tag.
    pub incomplete: Option<(MarkerKind, usize)>,
}

/// A block together with its decoding outcome.
#[derive(Debug)]
pub struct DecodedBlock {
    /// Block kind.
    pub kind: MarkerKind,
    /// Byte range of the whole block, tags included.
    pub span: Range<usize>,
    /// Decoded event, or the per-block error.
    pub result: Result<MarkerEvent>,
}

/// Lex `text` into complete marker blocks.
#[must_use]
pub fn scan(text: &str) -> Scan<'_> {
    let mut out = Scan::default();
    let mut pos = 0;

    while let Some(found) = text[pos..].find(TAG_PREFIX) {
        let start = pos + found;

        let Some(kind) = open_kind_at(text, start) else {
            // Stray comment or close tag: plain text.
            pos = start + TAG_PREFIX.len();
            continue;
        };

        let inner_start = start + kind.open_tag().len();
        let close = text[inner_start..]
            .find(kind.close_tag())
            .map(|offset| inner_start + offset);

        // Payloads never contain `<`, so a nested open tag means this one
        // was not a real block.
        if let Some(next) = next_open_tag(text, inner_start) {
            let interrupted = match close {
                Some(inner_end) => next < inner_end,
                None => true,
            };
            if interrupted {
                debug!(
                    kind = kind.name(),
                    offset = start,
                    "marker decoder: open tag interrupted by another, skipping"
                );
                pos = next;
                continue;
            }
        }

        let Some(inner_end) = close else {
            out.incomplete = Some((kind, start));
            break;
        };

        let end = inner_end + kind.close_tag().len();
        out.blocks.push(RawBlock {
            kind,
            start,
            end,
            inner: &text[inner_start..inner_end],
        });
        pos = end;
    }

    out
}

fn open_kind_at(text: &str, at: usize) -> Option<MarkerKind> {
    let rest = &text[at..];
    MarkerKind::ALL
        .into_iter()
        .find(|kind| rest.starts_with(kind.open_tag()))
}

/// Offset of the first known open tag at or after `from`.
fn next_open_tag(text: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(found) = text[pos..].find(TAG_PREFIX) {
        let at = pos + found;
        if open_kind_at(text, at).is_some() {
            return Some(at);
        }
        pos = at + TAG_PREFIX.len();
    }
    None
}

/// Unescape and deserialize the payload of one block.
///
/// # Errors
///
/// Returns [`AppError::EscapeRoundTrip`] when the unescaped text is not a
/// valid payload for `kind`: typically truncation, double escaping, or
/// text that was never escaped.
pub fn decode_inner(kind: MarkerKind, inner: &str) -> Result<MarkerEvent> {
    let json = unescape(inner);
    let event = match kind {
        MarkerKind::ToolDeclared => MarkerEvent::ToolDeclared(parse::<ToolDeclared>(kind, &json)?),
        MarkerKind::ToolCompleted => {
            MarkerEvent::ToolCompleted(parse::<ToolCompleted>(kind, &json)?)
        }
        MarkerKind::ToolFailed => MarkerEvent::ToolFailed(parse::<ToolFailed>(kind, &json)?),
        MarkerKind::SearchResults => {
            MarkerEvent::SearchResults(parse::<SearchResults>(kind, &json)?)
        }
        MarkerKind::MediaGenerationStarted => {
            MarkerEvent::MediaGenerationStarted(parse::<MediaGenerationStarted>(kind, &json)?)
        }
        MarkerKind::OptionsPrompt => {
            MarkerEvent::OptionsPrompt(parse::<OptionsPrompt>(kind, &json)?)
        }
    };
    Ok(event)
}

/// Decode every complete block in `text`, in order of appearance.
///
/// Per-block failures are returned in place; they never stop the remaining
/// blocks from decoding. Callers that poll a growing buffer decide when a
/// failure is worth a warning.
#[must_use]
pub fn decode_all(text: &str) -> Vec<DecodedBlock> {
    scan(text)
        .blocks
        .into_iter()
        .map(|block| {
            let result = decode_inner(block.kind, block.inner);
            if let Err(ref err) = result {
                debug!(
                    kind = block.kind.name(),
                    offset = block.start,
                    error = %err,
                    "marker decoder: undecodable block"
                );
            }
            DecodedBlock {
                kind: block.kind,
                span: block.start..block.end,
                result,
            }
        })
        .collect()
}

/// Remove every complete marker block, and any trailing incomplete one,
/// leaving only the prose.
#[must_use]
pub fn strip_markers(text: &str) -> String {
    let scanned = scan(text);
    let mut prose = String::with_capacity(text.len());
    let mut pos = 0;

    for block in &scanned.blocks {
        prose.push_str(&text[pos..block.start]);
        pos = block.end;
    }

    let tail_end = scanned.incomplete.map_or(text.len(), |(_, start)| start);
    prose.push_str(&text[pos..tail_end]);
    prose
}

/// Deduplicating decoder for consumers that want only new events.
///
/// Remembers each `(kind, offset)` it has returned. Because offsets in an
/// append-only buffer never move, polling a longer buffer returns only
/// blocks that completed since the previous poll.
#[derive(Debug, Default)]
pub struct MarkerDecoder {
    seen: HashSet<(MarkerKind, usize)>,
    failed: u64,
}

impl MarkerDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return events for blocks completed since the last poll.
    pub fn poll(&mut self, text: &str) -> Vec<MarkerEvent> {
        let mut fresh = Vec::new();
        for block in scan(text).blocks {
            if !self.seen.insert((block.kind, block.start)) {
                continue;
            }
            match decode_inner(block.kind, block.inner) {
                Ok(event) => fresh.push(event),
                Err(err) => {
                    self.failed += 1;
                    warn!(
                        kind = block.kind.name(),
                        offset = block.start,
                        error = %err,
                        "marker decoder: discarding undecodable block"
                    );
                }
            }
        }
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "marker decoder: new events");
        }
        fresh
    }

    /// Blocks that failed to decode so far.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Forget everything; used when a new turn reuses the decoder.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.failed = 0;
    }
}

fn parse<T: DeserializeOwned>(kind: MarkerKind, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| {
        AppError::EscapeRoundTrip(format!("{} payload did not deserialize: {e}", kind.name()))
    })
}
