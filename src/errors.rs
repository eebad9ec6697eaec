//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Stream-content errors (`FrameMalformed`, `EscapeRoundTrip`, `Marker`) are
/// always recoverable: callers skip the offending line or block and keep
/// consuming the stream.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A wire line does not match `<typeCode>:<string-literal>`.
    FrameMalformed(String),
    /// Unescaped marker content does not deserialize to the expected payload.
    EscapeRoundTrip(String),
    /// Marker encoding failure or unknown marker content.
    Marker(String),
    /// The external tool capability failed or rejected the call.
    ToolExecution(String),
    /// Model provider failure (request, stream, or protocol).
    Model(String),
    /// HTTP transport failure.
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The turn was cancelled by the consumer or by shutdown.
    Cancelled(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::FrameMalformed(msg) => write!(f, "frame malformed: {msg}"),
            Self::EscapeRoundTrip(msg) => write!(f, "escape round-trip: {msg}"),
            Self::Marker(msg) => write!(f, "marker: {msg}"),
            Self::ToolExecution(msg) => write!(f, "tool execution: {msg}"),
            Self::Model(msg) => write!(f, "model: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
