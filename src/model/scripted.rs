//! Scripted model backend.
//!
//! Each call to [`ModelBackend::stream`] replays the next scripted round as
//! a sequence of text deltas followed by a `stop` finish. When the script
//! runs out, further rounds produce an immediate finish with no text.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::{ChatMessage, DeltaStream, ModelBackend, ModelDelta, DELTA_CHANNEL_CAPACITY};
use crate::Result;

/// One scripted round: the deltas to emit, or a mid-stream failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRound {
    /// Emit these deltas, then finish with `stop`.
    Deltas(Vec<String>),
    /// Emit these deltas, then report `error`.
    Fails {
        /// Deltas sent before the failure.
        deltas: Vec<String>,
        /// Error message.
        error: String,
    },
}

/// Replays canned rounds and records the context each round was asked for.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    /// Backend replaying `rounds` in order.
    #[must_use]
    pub fn new(rounds: impl IntoIterator<Item = ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: every round succeeds with the given deltas.
    #[must_use]
    pub fn from_deltas<I, R, S>(rounds: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            rounds
                .into_iter()
                .map(|r| ScriptedRound::Deltas(r.into_iter().map(Into::into).collect())),
        )
    }

    /// Contexts received so far, one per round.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ModelBackend for ScriptedBackend {
    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream>> + Send + 'a>> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(messages.to_vec());

            let round = self
                .rounds
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or(ScriptedRound::Deltas(Vec::new()));

            let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let (deltas, tail) = match round {
                    ScriptedRound::Deltas(deltas) => (deltas, ModelDelta::Finish("stop".into())),
                    ScriptedRound::Fails { deltas, error } => (deltas, ModelDelta::Error(error)),
                };
                for delta in deltas {
                    if tx.send(ModelDelta::Text(delta)).await.is_err() {
                        debug!("scripted backend: receiver dropped mid-round");
                        return;
                    }
                }
                let _ = tx.send(tail).await;
            });

            Ok(rx)
        })
    }
}
