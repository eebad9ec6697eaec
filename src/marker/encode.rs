//! Marker encoder.

use std::borrow::Cow;

use serde::Serialize;

use super::{MarkerEvent, MarkerKind, TAG_PREFIX};
use crate::codec::{chunk, escape};
use crate::{AppError, Result};

/// Serialize the kind-specific payload of `event` to canonical JSON text.
///
/// Every `<` is written as the JSON escape `\u003c`. `<` can only occur
/// inside JSON strings, so the value is unchanged, and the payload can
/// never contain a delimiter tag.
///
/// # Errors
///
/// Returns [`AppError::Marker`] if serialization fails.
pub fn payload_json(event: &MarkerEvent) -> Result<String> {
    let json = match event {
        MarkerEvent::ToolDeclared(p) => to_json(p),
        MarkerEvent::ToolCompleted(p) => to_json(p),
        MarkerEvent::ToolFailed(p) => to_json(p),
        MarkerEvent::SearchResults(p) => to_json(p),
        MarkerEvent::MediaGenerationStarted(p) => to_json(p),
        MarkerEvent::OptionsPrompt(p) => to_json(p),
    }
    .map_err(|e| {
        AppError::Marker(format!(
            "failed to serialize {} payload: {e}",
            event.kind().name()
        ))
    })?;

    Ok(json.replace('<', "\\u003c"))
}

/// Encode `event` as one contiguous marker block.
///
/// # Errors
///
/// Returns [`AppError::Marker`] if serialization fails.
pub fn encode_block(event: &MarkerEvent) -> Result<String> {
    let kind = event.kind();
    let inner = escape(&payload_json(event)?);
    let mut block =
        String::with_capacity(kind.open_tag().len() + inner.len() + kind.close_tag().len());
    block.push_str(kind.open_tag());
    block.push_str(&inner);
    block.push_str(kind.close_tag());
    Ok(block)
}

/// Encode `event` as the ordered text pieces to send, one per frame.
///
/// The first piece is the open tag, the last the close tag, and the
/// escaped payload in between is split into pieces of at most
/// `chunk_size` characters. Concatenating the pieces yields
/// [`encode_block`]'s output.
///
/// # Errors
///
/// Returns [`AppError::Marker`] if serialization fails.
pub fn encode_pieces(event: &MarkerEvent, chunk_size: usize) -> Result<Vec<String>> {
    let kind: MarkerKind = event.kind();
    let inner = escape(&payload_json(event)?);
    let mut pieces = Vec::with_capacity(inner.len() / chunk_size.max(1) + 3);
    pieces.push(kind.open_tag().to_owned());
    pieces.extend(chunk(&inner, chunk_size));
    pieces.push(kind.close_tag().to_owned());
    Ok(pieces)
}

/// Break every `<!--` in prose with a zero-width space so that text from
/// the model can never be lexed as a marker tag.
#[must_use]
pub fn neutralize_tags(prose: &str) -> Cow<'_, str> {
    if prose.contains(TAG_PREFIX) {
        Cow::Owned(prose.replace(TAG_PREFIX, "<\u{200B}!--"))
    } else {
        Cow::Borrowed(prose)
    }
}

fn to_json<T: Serialize>(payload: &T) -> serde_json::Result<String> {
    serde_json::to_string(payload)
}
