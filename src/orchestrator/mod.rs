//! Server-side tool orchestration.
//!
//! Covers tool-call detection in model output, the per-request generation
//! context, and the turn loop that interleaves generation with tool runs.

pub mod context;
pub mod detector;
pub mod turn;

pub use context::TurnContext;
pub use turn::{Orchestrator, TurnOutcome};
