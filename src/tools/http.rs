//! HTTP tool server.
//!
//! `POST {base_url}/tools/{tool}` with body
//! `{"id": .., "server": .., "arguments": {..}}`. A 2xx response carries
//! `{"result": <any>, "events": [<marker event>..]}`; `events` is optional
//! and each entry is published through the notifier before the result is
//! returned. A response `{"error": "<message>"}` or any non-2xx status is a
//! tool failure.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ToolCapability, ToolNotifier, ToolRequest};
use crate::marker::MarkerEvent;
use crate::{AppError, Result};

/// A remote tool server reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpToolServer {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ToolResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    events: Vec<MarkerEvent>,
}

impl HttpToolServer {
    /// Tool server rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, tool: &str) -> String {
        format!("{}/tools/{tool}", self.base_url.trim_end_matches('/'))
    }
}

impl ToolCapability for HttpToolServer {
    fn execute(
        &self,
        request: ToolRequest,
        notifier: ToolNotifier,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            let url = self.endpoint(&request.tool);
            debug!(invocation_id = %request.id, %url, "http tool: calling");

            let resp = self
                .http
                .post(&url)
                .json(&serde_json::json!({
                    "id": request.id,
                    "server": request.server,
                    "arguments": request.arguments,
                }))
                .send()
                .await
                .map_err(|e| AppError::ToolExecution(format!("tool server unreachable: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ToolResponse>(&body)
                    .ok()
                    .and_then(|r| r.error)
                    .unwrap_or_else(|| format!("tool server returned {status}"));
                return Err(AppError::ToolExecution(message));
            }

            let body: ToolResponse = resp
                .json()
                .await
                .map_err(|e| AppError::ToolExecution(format!("invalid tool response: {e}")))?;

            for event in body.events {
                notifier.notify(event);
            }

            if let Some(error) = body.error {
                warn!(invocation_id = %request.id, %error, "http tool: tool reported failure");
                return Err(AppError::ToolExecution(error));
            }
            Ok(body.result.unwrap_or(Value::Null))
        })
    }
}
