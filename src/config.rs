//! Global configuration parsing, validation, and credential loading.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::escape::DEFAULT_CHUNK_SIZE;
use crate::frame::codec::MAX_LINE_BYTES;
use crate::{AppError, Result};

/// Smallest accepted `max_line_bytes`; a marker tag alone must fit.
const MIN_LINE_BYTES: usize = 256;

fn default_http_port() -> u16 {
    3000
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_tool_rounds() -> u32 {
    8
}

fn default_tool_timeout_seconds() -> u64 {
    120
}

fn default_analysis_instruction() -> String {
    "Analyze the tool result above and explain what it means for the user's request \
     before continuing. Call another tool only if the result is insufficient."
        .into()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. To call a tool, write \
     <tool_call>{\"tool\": \"<name>\", \"server\": \"<server>\", \"arguments\": {...}}</tool_call> \
     and stop; the result will be provided to you."
        .into()
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model_id() -> String {
    "gpt-4o-mini".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// Stream framing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Characters per marker payload piece.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Longest frame line, newline excluded, the server writes and a reader
    /// accepts.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Frames buffered between the orchestrator and the HTTP body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_line_bytes: default_max_line_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Tool orchestration settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Tool calls allowed per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Seconds a tool may run before it is failed.
    #[serde(default = "default_tool_timeout_seconds")]
    pub tool_timeout_seconds: u64,
    /// Directive appended to the context after every tool result.
    #[serde(default = "default_analysis_instruction")]
    pub analysis_instruction: String,
    /// System prompt prepended to every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_seconds: default_tool_timeout_seconds(),
            analysis_instruction: default_analysis_instruction(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl OrchestratorConfig {
    /// Tool timeout as a [`Duration`].
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }
}

/// Which model backend serves generations.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// OpenAI-compatible `chat/completions` endpoint.
    #[default]
    Openai,
    /// Canned rounds from `model.script`.
    Scripted,
}

/// Model backend settings.
///
/// The API key is read at runtime from the environment variable named by
/// `api_key_env`, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    /// Backend kind.
    #[serde(default)]
    pub provider: ModelProvider,
    /// Provider base URL, without the `/v1/...` path.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier sent to the provider.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens per generation round.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rounds replayed by the scripted provider, each a list of deltas.
    #[serde(default)]
    pub script: Vec<Vec<String>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::default(),
            base_url: default_base_url(),
            model_id: default_model_id(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            script: Vec::new(),
        }
    }
}

impl ModelConfig {
    /// Load the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is unset or empty.
    pub fn api_key(&self) -> Result<String> {
        match env::var(&self.api_key_env) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(AppError::Config(format!(
                "model API key not found in {} env var",
                self.api_key_env
            ))),
        }
    }
}

/// One named tool server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolServerConfig {
    /// Name the model uses in the `server` field of a tool call.
    pub name: String,
    /// Base URL; calls go to `{url}/tools/{tool}`.
    pub url: String,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the chat transport.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Stream framing settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Tool orchestration settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Model backend settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Registered tool servers.
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            stream: StreamConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            model: ModelConfig::default(),
            tool_servers: Vec::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.chunk_size == 0 {
            return Err(AppError::Config(
                "stream.chunk_size must be greater than zero".into(),
            ));
        }

        if self.stream.max_line_bytes < MIN_LINE_BYTES {
            return Err(AppError::Config(format!(
                "stream.max_line_bytes must be at least {MIN_LINE_BYTES}"
            )));
        }

        if self.stream.channel_capacity == 0 {
            return Err(AppError::Config(
                "stream.channel_capacity must be greater than zero".into(),
            ));
        }

        if self.orchestrator.max_tool_rounds == 0 {
            return Err(AppError::Config(
                "orchestrator.max_tool_rounds must be greater than zero".into(),
            ));
        }

        if self.orchestrator.tool_timeout_seconds == 0 {
            return Err(AppError::Config(
                "orchestrator.tool_timeout_seconds must be greater than zero".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AppError::Config(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.provider == ModelProvider::Openai
            && (self.model.base_url.is_empty() || self.model.model_id.is_empty())
        {
            return Err(AppError::Config(
                "model.base_url and model.model_id must not be empty".into(),
            ));
        }

        let mut names = HashSet::new();
        for server in &self.tool_servers {
            if server.name.is_empty() || server.url.is_empty() {
                return Err(AppError::Config(
                    "tool_servers entries need a name and a url".into(),
                ));
            }
            if !names.insert(server.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate tool server name: {}",
                    server.name
                )));
            }
        }

        Ok(())
    }
}
