//! Tool invocation lifecycle.
//!
//! [`ToolInvocation`] is shared by both ends of the stream: the
//! orchestration loop keeps a ledger of the calls it runs, and the consumer
//! derives the same list from the cumulative text it has received.
//!
//! Status only moves forward:
//! `Declared → Executing → {Completed | Failed}`.
//!
//! Submodules:
//! - `session`: [`GenerationSession`](session::GenerationSession), the
//!   consumer-side view model for one assistant turn.

pub mod session;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::marker::decode::{decode_all, DecodedBlock};
use crate::marker::{MarkerEvent, ToolCompleted, ToolDeclared, ToolFailed};
use crate::{AppError, Result};

/// Lifecycle state of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Detected in model output, not yet started.
    Declared,
    /// Handed to the tool capability, awaiting its result.
    Executing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl InvocationStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::Declared => 0,
            Self::Executing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// One declared tool call and its resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique id carried by every block about this call.
    pub id: String,
    /// Tool name.
    pub tool: String,
    /// Tool server name.
    pub server: String,
    /// Call arguments.
    pub arguments: Map<String, Value>,
    /// Current lifecycle state.
    pub status: InvocationStatus,
    /// Result, once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Declaration time.
    pub declared_at: DateTime<Utc>,
    /// Resolution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    /// Create an invocation in the `Declared` state.
    pub fn declared(
        id: impl Into<String>,
        tool: impl Into<String>,
        server: impl Into<String>,
        arguments: Map<String, Value>,
        declared_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            server: server.into(),
            arguments,
            status: InvocationStatus::Declared,
            result: None,
            error: None,
            declared_at,
            resolved_at: None,
        }
    }

    /// Seed an invocation from a decoded declaration block.
    ///
    /// A declaration block is only written once execution is about to
    /// start, so the seeded invocation is already `Executing`.
    #[must_use]
    pub fn from_declaration(decl: &ToolDeclared) -> Self {
        let mut inv = Self::declared(
            decl.id.clone(),
            decl.tool.clone(),
            decl.server.clone(),
            decl.arguments.clone(),
            decl.declared_at,
        );
        inv.status = InvocationStatus::Executing;
        inv
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Marker`] for a backward or repeated transition;
    /// the invocation is left unchanged.
    pub fn advance(&mut self, next: InvocationStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(AppError::Marker(format!(
                "invalid transition for invocation {}: {:?} -> {next:?}",
                self.id, self.status
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark the invocation as started.
    ///
    /// # Errors
    ///
    /// See [`ToolInvocation::advance`].
    pub fn start(&mut self) -> Result<()> {
        self.advance(InvocationStatus::Executing)
    }

    /// Resolve with a result.
    ///
    /// # Errors
    ///
    /// See [`ToolInvocation::advance`].
    pub fn complete(&mut self, result: Value, at: DateTime<Utc>) -> Result<()> {
        self.advance(InvocationStatus::Completed)?;
        self.result = Some(result);
        self.resolved_at = Some(at);
        Ok(())
    }

    /// Resolve with an error.
    ///
    /// # Errors
    ///
    /// See [`ToolInvocation::advance`].
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.advance(InvocationStatus::Failed)?;
        self.error = Some(error.into());
        self.resolved_at = Some(at);
        Ok(())
    }

    /// `resolved_at - declared_at`, once resolved.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.resolved_at.map(|at| at - self.declared_at)
    }

    fn matches_call(&self, tool: &str, server: &str) -> bool {
        self.tool == tool && self.server == server
    }
}

/// Derive the invocation list for one turn from its cumulative text.
///
/// Pure function of `text`: equal inputs give equal outputs, and extending
/// the text never changes invocations already resolved in the shorter text.
#[must_use]
pub fn derive_invocations(text: &str) -> Vec<ToolInvocation> {
    derive_from_blocks(&decode_all(text))
}

/// Derive invocations from already-decoded blocks.
///
/// 1. Every `ToolDeclared` block seeds one `Executing` invocation, in order;
///    a repeated id is ignored.
/// 2. Every `ToolCompleted`/`ToolFailed` block resolves the `Executing`
///    invocation with its id. A block without an id resolves the earliest
///    `Executing` invocation with the same tool and server.
/// 3. Anything left unmatched stays `Executing`.
#[must_use]
pub fn derive_from_blocks(blocks: &[DecodedBlock]) -> Vec<ToolInvocation> {
    let mut invocations: Vec<ToolInvocation> = Vec::new();

    for block in blocks {
        if let Ok(MarkerEvent::ToolDeclared(decl)) = &block.result {
            if invocations.iter().any(|inv| inv.id == decl.id) {
                debug!(invocation_id = %decl.id, "derive: duplicate declaration ignored");
                continue;
            }
            invocations.push(ToolInvocation::from_declaration(decl));
        }
    }

    for block in blocks {
        match &block.result {
            Ok(MarkerEvent::ToolCompleted(done)) => resolve_completed(&mut invocations, done),
            Ok(MarkerEvent::ToolFailed(failed)) => resolve_failed(&mut invocations, failed),
            _ => {}
        }
    }

    invocations
}

fn resolve_completed(invocations: &mut [ToolInvocation], done: &ToolCompleted) {
    let Some(inv) = find_executing(invocations, done.id.as_deref(), &done.tool, &done.server)
    else {
        warn!(
            invocation_id = ?done.id,
            tool = %done.tool,
            server = %done.server,
            "derive: completion without a matching executing invocation"
        );
        return;
    };
    if let Err(err) = inv.complete(done.result.clone(), done.resolved_at) {
        warn!(error = %err, "derive: completion rejected");
    }
}

fn resolve_failed(invocations: &mut [ToolInvocation], failed: &ToolFailed) {
    let Some(inv) = find_executing(invocations, failed.id.as_deref(), &failed.tool, &failed.server)
    else {
        warn!(
            invocation_id = ?failed.id,
            tool = %failed.tool,
            server = %failed.server,
            "derive: failure without a matching executing invocation"
        );
        return;
    };
    if let Err(err) = inv.fail(failed.error.clone(), failed.resolved_at) {
        warn!(error = %err, "derive: failure rejected");
    }
}

fn find_executing<'a>(
    invocations: &'a mut [ToolInvocation],
    id: Option<&str>,
    tool: &str,
    server: &str,
) -> Option<&'a mut ToolInvocation> {
    let executing = |inv: &&mut ToolInvocation| inv.status == InvocationStatus::Executing;
    match id {
        Some(id) => invocations
            .iter_mut()
            .filter(executing)
            .find(|inv| inv.id == id),
        None => invocations
            .iter_mut()
            .filter(executing)
            .find(|inv| inv.matches_call(tool, server)),
    }
}
