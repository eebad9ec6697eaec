//! Marker blocks: structured events embedded in assistant text.
//!
//! A marker block is `<open-tag>` + escaped JSON payload + `<close-tag>`,
//! carried inside ordinary text frames. The set of kinds is closed: each
//! [`MarkerKind`] has exactly one tag pair and one payload schema, and any
//! payload that does not match its schema is rejected rather than guessed
//! at.
//!
//! Submodules:
//! - `encode`: payload serialization, escaping and chunking into pieces.
//! - `decode`: lexer over a cumulative text buffer, payload decoding, prose
//!   extraction and the deduplicating [`MarkerDecoder`](decode::MarkerDecoder).

pub mod decode;
pub mod encode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Common prefix of every marker tag.
pub const TAG_PREFIX: &str = "<!--";

/// Closed set of marker block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerKind {
    /// A tool call was declared and is about to execute.
    ToolDeclared,
    /// A tool call returned a result.
    ToolCompleted,
    /// A tool call failed.
    ToolFailed,
    /// Search hits to render alongside the answer.
    SearchResults,
    /// Image or video generation has started.
    MediaGenerationStarted,
    /// The assistant offers the user a set of choices.
    OptionsPrompt,
}

impl MarkerKind {
    /// Every kind, in lexer priority order.
    pub const ALL: [Self; 6] = [
        Self::ToolDeclared,
        Self::ToolCompleted,
        Self::ToolFailed,
        Self::SearchResults,
        Self::MediaGenerationStarted,
        Self::OptionsPrompt,
    ];

    /// Opening delimiter.
    #[must_use]
    pub const fn open_tag(self) -> &'static str {
        match self {
            Self::ToolDeclared => "<!--tool:declared-->",
            Self::ToolCompleted => "<!--tool:completed-->",
            Self::ToolFailed => "<!--tool:failed-->",
            Self::SearchResults => "<!--search:results-->",
            Self::MediaGenerationStarted => "<!--media:started-->",
            Self::OptionsPrompt => "<!--options:prompt-->",
        }
    }

    /// Closing delimiter.
    #[must_use]
    pub const fn close_tag(self) -> &'static str {
        match self {
            Self::ToolDeclared => "<!--/tool:declared-->",
            Self::ToolCompleted => "<!--/tool:completed-->",
            Self::ToolFailed => "<!--/tool:failed-->",
            Self::SearchResults => "<!--/search:results-->",
            Self::MediaGenerationStarted => "<!--/media:started-->",
            Self::OptionsPrompt => "<!--/options:prompt-->",
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ToolDeclared => "tool_declared",
            Self::ToolCompleted => "tool_completed",
            Self::ToolFailed => "tool_failed",
            Self::SearchResults => "search_results",
            Self::MediaGenerationStarted => "media_generation_started",
            Self::OptionsPrompt => "options_prompt",
        }
    }
}

/// Payload of a [`MarkerKind::ToolDeclared`] block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDeclared {
    /// Invocation id assigned by the orchestrator.
    pub id: String,
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Call arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// When the declaration was detected.
    pub declared_at: DateTime<Utc>,
}

/// Payload of a [`MarkerKind::ToolCompleted`] block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCompleted {
    /// Invocation id; absent only in blocks from older producers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Tool result.
    pub result: Value,
    /// When the result arrived.
    pub resolved_at: DateTime<Utc>,
}

/// Payload of a [`MarkerKind::ToolFailed`] block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolFailed {
    /// Invocation id; absent only in blocks from older producers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Failure message.
    pub error: String,
    /// When the failure was observed.
    pub resolved_at: DateTime<Utc>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Optional excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Payload of a [`MarkerKind::SearchResults`] block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchResults {
    /// Query that produced the hits.
    pub query: String,
    /// Hits in rank order.
    pub results: Vec<SearchHit>,
}

/// Kind of media being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
}

/// Payload of a [`MarkerKind::MediaGenerationStarted`] block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaGenerationStarted {
    /// Generation job id.
    pub id: String,
    /// Image or video.
    pub media: MediaKind,
    /// Prompt sent to the generator.
    pub prompt: String,
    /// Generator model, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Payload of a [`MarkerKind::OptionsPrompt`] block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsPrompt {
    /// Question shown above the options.
    pub question: String,
    /// Choices in display order.
    pub options: Vec<String>,
}

/// A decoded (or to-be-encoded) marker event.
///
/// The serde form (`{"kind": "...", ...}`) is used where events travel as
/// standalone JSON, e.g. in tool-server responses. Inside a marker block
/// the kind comes from the tag pair and only the payload is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerEvent {
    /// See [`ToolDeclared`].
    ToolDeclared(ToolDeclared),
    /// See [`ToolCompleted`].
    ToolCompleted(ToolCompleted),
    /// See [`ToolFailed`].
    ToolFailed(ToolFailed),
    /// See [`SearchResults`].
    SearchResults(SearchResults),
    /// See [`MediaGenerationStarted`].
    MediaGenerationStarted(MediaGenerationStarted),
    /// See [`OptionsPrompt`].
    OptionsPrompt(OptionsPrompt),
}

impl MarkerEvent {
    /// Block kind this event is carried in.
    #[must_use]
    pub const fn kind(&self) -> MarkerKind {
        match self {
            Self::ToolDeclared(_) => MarkerKind::ToolDeclared,
            Self::ToolCompleted(_) => MarkerKind::ToolCompleted,
            Self::ToolFailed(_) => MarkerKind::ToolFailed,
            Self::SearchResults(_) => MarkerKind::SearchResults,
            Self::MediaGenerationStarted(_) => MarkerKind::MediaGenerationStarted,
            Self::OptionsPrompt(_) => MarkerKind::OptionsPrompt,
        }
    }

    /// `true` for the three tool lifecycle kinds.
    #[must_use]
    pub const fn is_tool_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::ToolDeclared(_) | Self::ToolCompleted(_) | Self::ToolFailed(_)
        )
    }
}
