//! Text-level codecs shared by the marker encoder and decoder.
//!
//! - `escape`: reversible backslash/quote escaping plus fixed-size chunking
//!   for payloads that must not land in one oversized frame.

pub mod escape;

pub use escape::{chunk, escape, reassemble, unescape, DEFAULT_CHUNK_SIZE};
