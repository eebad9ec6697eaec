//! The tool orchestration loop.
//!
//! One turn alternates between generating and running tools:
//!
//! 1. Stream model deltas to the writer as text frames while the detector
//!    watches for a tool call.
//! 2. On a call, stop consuming the model, write a `ToolDeclared` block and
//!    a `9:` echo, and run the tool. Events the tool publishes meanwhile are
//!    written as their own blocks.
//! 3. Write `ToolCompleted` or `ToolFailed`, append the exchange and the
//!    analysis instruction to the context, and generate again.
//!
//! Tools run one at a time. A tool failure, timeout or malformed call is a
//! `ToolFailed` block, never the end of the stream. The turn always ends
//! with exactly one finish frame when the consumer is still listening.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::TurnContext;
use super::detector::{parse_declaration, salvage_names, Detected, ToolCallDetector, ToolCallSpec};
use crate::config::OrchestratorConfig;
use crate::frame::writer::FrameWriter;
use crate::frame::FinishReason;
use crate::invocation::ToolInvocation;
use crate::marker::{MarkerEvent, ToolCompleted, ToolDeclared, ToolFailed};
use crate::model::{ModelBackend, ModelDelta};
use crate::tools::{ToolCapability, ToolNotifier, ToolRequest};
use crate::{AppError, Result};

type ToolOutcome = std::result::Result<Value, String>;

/// Summary of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Reason written in the finish frame.
    pub finish_reason: FinishReason,
    /// Server-side ledger of the turn's tool invocations.
    pub invocations: Vec<ToolInvocation>,
    /// Tool rounds started.
    pub tool_rounds: u32,
}

enum RoundEnd {
    Finished,
    ToolCall { prose: String, raw: String },
    ModelError(String),
    Cancelled,
}

enum ToolStep {
    Resolved,
    Cancelled,
}

/// Drives turns against a model backend and a tool capability.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    model: Arc<dyn ModelBackend>,
    tools: Arc<dyn ToolCapability>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        model: Arc<dyn ModelBackend>,
        tools: Arc<dyn ToolCapability>,
    ) -> Self {
        Self {
            config,
            model,
            tools,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one turn to completion, writing every frame to `writer`.
    ///
    /// The finish frame is written here and nowhere else. When the consumer
    /// has gone away the outcome still reports
    /// [`FinishReason::Cancelled`].
    pub async fn run_turn(
        &self,
        ctx: &mut TurnContext,
        writer: &FrameWriter,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let finish_reason = match self.drive(ctx, writer, cancel).await {
            Ok(reason) => reason,
            Err(AppError::Cancelled(reason)) => {
                debug!(session_id = %ctx.session_id(), %reason, "orchestrator: turn abandoned");
                FinishReason::Cancelled
            }
            Err(err) => {
                warn!(session_id = %ctx.session_id(), %err, "orchestrator: turn failed");
                if let Err(write_err) = writer.error(&err.to_string()).await {
                    debug!(%write_err, "orchestrator: error frame not delivered");
                }
                FinishReason::Error
            }
        };

        if let Err(err) = writer.finish(finish_reason).await {
            debug!(session_id = %ctx.session_id(), %err, "orchestrator: finish frame not delivered");
        }

        info!(
            session_id = %ctx.session_id(),
            finish_reason = %finish_reason,
            tool_rounds = ctx.tool_rounds(),
            "orchestrator: turn finished"
        );

        TurnOutcome {
            finish_reason,
            invocations: ctx.ledger().to_vec(),
            tool_rounds: ctx.tool_rounds(),
        }
    }

    async fn drive(
        &self,
        ctx: &mut TurnContext,
        writer: &FrameWriter,
        cancel: &CancellationToken,
    ) -> Result<FinishReason> {
        loop {
            match self.generate_round(ctx, writer, cancel).await? {
                RoundEnd::Finished => return Ok(FinishReason::Stop),
                RoundEnd::Cancelled => return Ok(FinishReason::Cancelled),
                RoundEnd::ModelError(message) => {
                    writer.error(&message).await?;
                    return Ok(FinishReason::Error);
                }
                RoundEnd::ToolCall { prose, raw } => {
                    let limit = self.config.max_tool_rounds;
                    if ctx.tool_rounds() >= limit {
                        warn!(
                            session_id = %ctx.session_id(),
                            limit,
                            "orchestrator: tool round limit reached"
                        );
                        writer
                            .error(&format!("tool round limit of {limit} reached"))
                            .await?;
                        return Ok(FinishReason::ToolLimit);
                    }
                    ctx.begin_tool_round();
                    if let ToolStep::Cancelled =
                        self.run_tool(ctx, &prose, &raw, writer, cancel).await?
                    {
                        return Ok(FinishReason::Cancelled);
                    }
                }
            }
        }
    }

    async fn generate_round(
        &self,
        ctx: &mut TurnContext,
        writer: &FrameWriter,
        cancel: &CancellationToken,
    ) -> Result<RoundEnd> {
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(RoundEnd::Cancelled),
            () = writer.closed() => return Ok(RoundEnd::Cancelled),
            started = self.model.stream(ctx.messages()) => started,
        };
        let mut deltas = match started {
            Ok(deltas) => deltas,
            Err(err) => {
                warn!(session_id = %ctx.session_id(), %err, "orchestrator: model request failed");
                return Ok(RoundEnd::ModelError(err.to_string()));
            }
        };

        let mut detector = ToolCallDetector::new();
        let mut prose = String::new();

        loop {
            let delta = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(RoundEnd::Cancelled),
                () = writer.closed() => return Ok(RoundEnd::Cancelled),
                delta = deltas.recv() => delta,
            };

            match delta {
                Some(ModelDelta::Text(text)) => {
                    for piece in detector.push(&text) {
                        match piece {
                            Detected::Text(text) => {
                                writer.text(&text).await?;
                                prose.push_str(&text);
                            }
                            Detected::Call(raw) => {
                                debug!(session_id = %ctx.session_id(), "orchestrator: tool call detected");
                                return Ok(RoundEnd::ToolCall { prose, raw });
                            }
                        }
                    }
                }
                Some(ModelDelta::Finish(reason)) => {
                    debug!(session_id = %ctx.session_id(), provider_reason = %reason, "orchestrator: round finished");
                    break;
                }
                Some(ModelDelta::Error(message)) => {
                    warn!(session_id = %ctx.session_id(), %message, "orchestrator: model stream failed");
                    return Ok(RoundEnd::ModelError(AppError::Model(message).to_string()));
                }
                None => {
                    debug!(session_id = %ctx.session_id(), "orchestrator: model stream closed without finish");
                    break;
                }
            }
        }

        match detector.finish() {
            Some(Detected::Call(raw)) => return Ok(RoundEnd::ToolCall { prose, raw }),
            Some(Detected::Text(text)) => {
                writer.text(&text).await?;
                prose.push_str(&text);
            }
            None => {}
        }

        ctx.push_assistant(&prose);
        Ok(RoundEnd::Finished)
    }

    async fn run_tool(
        &self,
        ctx: &mut TurnContext,
        prose: &str,
        raw: &str,
        writer: &FrameWriter,
        cancel: &CancellationToken,
    ) -> Result<ToolStep> {
        let id = Uuid::new_v4().to_string();
        let (spec, parse_error) = match parse_declaration(raw) {
            Ok(spec) => (spec, None),
            Err(err) => {
                let (tool, server) = salvage_names(raw);
                let spec = ToolCallSpec {
                    tool,
                    server,
                    arguments: Map::new(),
                };
                (spec, Some(failure_message(err)))
            }
        };

        let mut invocation = ToolInvocation::declared(
            id.clone(),
            spec.tool.clone(),
            spec.server.clone(),
            spec.arguments.clone(),
            Utc::now(),
        );
        writer
            .marker(&MarkerEvent::ToolDeclared(ToolDeclared {
                id: id.clone(),
                tool: spec.tool.clone(),
                server: spec.server.clone(),
                arguments: spec.arguments.clone(),
                declared_at: invocation.declared_at,
            }))
            .await?;
        info!(
            session_id = %ctx.session_id(),
            invocation_id = %id,
            tool = %spec.tool,
            server = %spec.server,
            "orchestrator: tool declared"
        );

        let outcome = if let Some(message) = parse_error {
            warn!(session_id = %ctx.session_id(), invocation_id = %id, %message, "orchestrator: malformed tool call");
            Err(message)
        } else {
            let request = ToolRequest {
                id: id.clone(),
                tool: spec.tool.clone(),
                server: spec.server.clone(),
                arguments: spec.arguments,
            };
            let echo = serde_json::to_string(&request)
                .map_err(|e| AppError::FrameMalformed(format!("tool call echo: {e}")))?;
            writer.tool_call_echo(&echo).await?;
            invocation.start()?;

            match self.execute(request, writer, cancel).await? {
                Some(outcome) => outcome,
                None => {
                    debug!(session_id = %ctx.session_id(), invocation_id = %id, "orchestrator: cancelled during tool execution");
                    return Ok(ToolStep::Cancelled);
                }
            }
        };

        let resolved_at = Utc::now();
        let event = match outcome {
            Ok(result) => {
                invocation.complete(result.clone(), resolved_at)?;
                info!(
                    session_id = %ctx.session_id(),
                    invocation_id = %id,
                    elapsed_ms = invocation.duration().map(|d| d.num_milliseconds()),
                    "orchestrator: tool completed"
                );
                MarkerEvent::ToolCompleted(ToolCompleted {
                    id: Some(id),
                    tool: spec.tool,
                    server: spec.server,
                    result,
                    resolved_at,
                })
            }
            Err(error) => {
                invocation.fail(error.clone(), resolved_at)?;
                warn!(
                    session_id = %ctx.session_id(),
                    invocation_id = %id,
                    %error,
                    "orchestrator: tool failed"
                );
                MarkerEvent::ToolFailed(ToolFailed {
                    id: Some(id),
                    tool: spec.tool,
                    server: spec.server,
                    error,
                    resolved_at,
                })
            }
        };
        writer.marker(&event).await?;

        ctx.push_tool_exchange(prose, raw, invocation, &self.config.analysis_instruction);
        Ok(ToolStep::Resolved)
    }

    /// Run the tool, forwarding its notices; `None` means cancelled.
    async fn execute(
        &self,
        request: ToolRequest,
        writer: &FrameWriter,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolOutcome>> {
        let timeout = self.config.tool_timeout();
        let (notifier, mut notices) = ToolNotifier::channel();
        let mut call = self.tools.execute(request, notifier);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = writer.closed() => return Ok(None),
                Some(event) = notices.recv() => writer.marker(&event).await?,
                result = &mut call => break result.map_err(failure_message),
                () = &mut deadline => {
                    break Err(format!("tool timed out after {}s", timeout.as_secs()));
                }
            }
        };
        drop(call);

        while let Ok(event) = notices.try_recv() {
            writer.marker(&event).await?;
        }
        Ok(Some(outcome))
    }
}

/// Message shown to the user for a failed call.
fn failure_message(err: AppError) -> String {
    match err {
        AppError::ToolExecution(message) => message,
        other => other.to_string(),
    }
}
