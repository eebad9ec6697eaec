//! Tool capability lookup.
//!
//! The orchestration loop knows nothing about how a tool runs. It hands a
//! [`ToolRequest`] to a [`ToolCapability`] and awaits a JSON result or an
//! error. [`ToolRegistry`] is the usual capability: it routes each request
//! to the tool server registered under the request's `server` name.
//!
//! While a tool runs it may publish side events (search hits, media jobs,
//! option prompts) through its [`ToolNotifier`]; the loop writes each one to
//! the stream as a marker block as soon as it arrives.

pub mod http;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ToolServerConfig;
use crate::marker::MarkerEvent;
use crate::{AppError, Result};

/// One call handed to a tool capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRequest {
    /// Invocation id.
    pub id: String,
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Call arguments.
    pub arguments: Map<String, Value>,
}

/// Side channel a running tool uses to publish events.
#[derive(Debug, Clone)]
pub struct ToolNotifier {
    tx: mpsc::UnboundedSender<MarkerEvent>,
}

impl ToolNotifier {
    /// Create a notifier and the receiver the orchestrator drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MarkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event. Tool lifecycle events are owned by the
    /// orchestrator and are dropped here.
    pub fn notify(&self, event: MarkerEvent) {
        if event.is_tool_lifecycle() {
            debug!(kind = event.kind().name(), "tool notifier: lifecycle event dropped");
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("tool notifier: orchestrator no longer listening");
        }
    }
}

/// Something that can execute a tool call.
pub trait ToolCapability: Send + Sync {
    /// Run `request` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ToolExecution`] with a human-readable message
    /// when the tool fails; the message is shown to the user verbatim.
    fn execute(
        &self,
        request: ToolRequest,
        notifier: ToolNotifier,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

/// Routes requests to capabilities by tool server name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    servers: HashMap<String, Arc<dyn ToolCapability>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.servers.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("servers", &names).finish()
    }
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of HTTP tool servers from configuration.
    #[must_use]
    pub fn from_config(servers: &[ToolServerConfig]) -> Self {
        let mut registry = Self::new();
        for server in servers {
            registry.register(
                server.name.clone(),
                Arc::new(http::HttpToolServer::new(server.url.clone())),
            );
        }
        registry
    }

    /// Register (or replace) the capability for `server`.
    pub fn register(&mut self, server: impl Into<String>, capability: Arc<dyn ToolCapability>) {
        self.servers.insert(server.into(), capability);
    }

    /// Capability registered for `server`, if any.
    #[must_use]
    pub fn lookup(&self, server: &str) -> Option<Arc<dyn ToolCapability>> {
        self.servers.get(server).cloned()
    }

    /// Number of registered servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl ToolCapability for ToolRegistry {
    fn execute(
        &self,
        request: ToolRequest,
        notifier: ToolNotifier,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            let capability = self.lookup(&request.server).ok_or_else(|| {
                AppError::ToolExecution(format!("unknown tool server: {}", request.server))
            })?;
            capability.execute(request, notifier).await
        })
    }
}
