//! Reversible escaping and fixed-size chunking for marker payloads.
//!
//! A marker payload travels inside a frame whose whole line is serialized
//! once as a string literal. The payload therefore only needs the two
//! characters that would collide with an enclosing literal escaped:
//! backslash and double-quote. Control characters are left untouched; the
//! frame serializer already encodes them, and escaping them here as well
//! produces text that no longer parses after a single unescape.

/// Default piece size used when splitting marker payloads across frames.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Escape backslash then double-quote so `text` can sit inside a literal.
///
/// Backslashes go first; doing quotes first would double the backslashes
/// that the quote pass just introduced.
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Exact inverse of [`escape`]: quotes are restored first, then backslashes.
///
/// Applying this to text that was never escaped, or was escaped twice,
/// usually yields something that fails to parse downstream. Callers treat
/// that as a per-block error.
#[must_use]
pub fn unescape(text: &str) -> String {
    text.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// Split `text` into consecutive pieces of at most `max_chars` characters.
///
/// Splits on `char` boundaries so multi-byte text never produces invalid
/// UTF-8. A `max_chars` of zero disables splitting. Empty input yields no
/// pieces.
#[must_use]
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_owned()];
    }

    let mut pieces = Vec::with_capacity(text.len() / max_chars + 1);
    let mut current = String::with_capacity(max_chars);
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == max_chars {
            pieces.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Reassemble pieces produced by [`chunk`].
///
/// Plain concatenation: completeness is decided by the consumer seeing a
/// block's closing tag, not by any piece count.
#[must_use]
pub fn reassemble<S: AsRef<str>>(pieces: &[S]) -> String {
    pieces.iter().map(AsRef::as_ref).collect()
}
