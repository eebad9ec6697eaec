//! Language-model generation seam.
//!
//! The orchestration loop only needs an ordered source of text deltas for a
//! given conversation. [`ModelBackend`] hides the provider behind that
//! shape: each call to [`ModelBackend::stream`] starts one generation and
//! returns the receiving end of a channel the provider task feeds.
//!
//! Backends:
//! - `openai`: OpenAI-compatible `chat/completions` streaming over SSE.
//! - `scripted`: replays canned rounds; used by tests and offline demos.

pub mod openai;
pub mod scripted;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{ModelConfig, ModelProvider};
use crate::Result;

/// Channel capacity between a provider task and the orchestration loop.
pub const DELTA_CHANNEL_CAPACITY: usize = 256;

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// End user, or a directive injected on the user's behalf.
    User,
    /// The model.
    Assistant,
    /// Tool output fed back to the model.
    Tool,
}

/// One entry of the generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Create a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool output message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelDelta {
    /// Generated text.
    Text(String),
    /// The provider finished; carries its own finish reason.
    Finish(String),
    /// The provider failed mid-stream.
    Error(String),
}

/// Receiving end of one generation.
pub type DeltaStream = mpsc::Receiver<ModelDelta>;

/// Provider-agnostic streaming generation.
pub trait ModelBackend: Send + Sync {
    /// Start generating a continuation of `messages`.
    ///
    /// Dropping the returned receiver abandons the generation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Model`](crate::AppError::Model) or
    /// [`AppError::Http`](crate::AppError::Http) when the request cannot
    /// be started.
    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream>> + Send + 'a>>;
}

/// Build the backend selected by `config.provider`.
///
/// # Errors
///
/// Returns [`AppError::Config`](crate::AppError::Config) when the OpenAI
/// provider is selected and its API key is missing.
pub fn from_config(config: &ModelConfig) -> Result<Arc<dyn ModelBackend>> {
    match config.provider {
        ModelProvider::Openai => {
            let api_key = config.api_key()?;
            Ok(Arc::new(openai::OpenAiBackend::new(config.clone(), api_key)))
        }
        ModelProvider::Scripted => Ok(Arc::new(scripted::ScriptedBackend::from_deltas(
            config.script.clone(),
        ))),
    }
}
