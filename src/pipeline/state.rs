//! Per-message pipeline state machine
//!
//! ```text
//! Received -> Parsed -> Validated -> Allowed -> Persisted -> Completed
//!     \          \          \           \           \
//!      +----------+----------+-----------+-----------+--> Failed
//! ```
//!
//! `Completed` and `Failed` are terminal. States are never revisited.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle state of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Bytes taken from the broker
    Received,
    /// Envelope and report sections decoded
    Parsed,
    /// Schema version checked
    Validated,
    /// Organization passed the allow-list
    Allowed,
    /// Writes done (possibly skipped as stale)
    Persisted,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// The single successor on the happy path
    pub fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Received => Some(PipelineState::Parsed),
            PipelineState::Parsed => Some(PipelineState::Validated),
            PipelineState::Validated => Some(PipelineState::Allowed),
            PipelineState::Allowed => Some(PipelineState::Persisted),
            PipelineState::Persisted => Some(PipelineState::Completed),
            PipelineState::Completed | PipelineState::Failed => None,
        }
    }

    pub fn can_transition_to(self, to: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == PipelineState::Failed || self.next() == Some(to)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Received => "received",
            PipelineState::Parsed => "parsed",
            PipelineState::Validated => "validated",
            PipelineState::Allowed => "allowed",
            PipelineState::Persisted => "persisted",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Progress of one message through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    state: PipelineState,
    history: Vec<PipelineState>,
    started: Instant,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    /// Start in `Received`, timing from now
    pub fn new() -> Self {
        Self {
            state: PipelineState::Received,
            history: vec![PipelineState::Received],
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, to: PipelineState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed` unless already terminal. Returns whether it moved.
    pub fn fail(&mut self) -> bool {
        self.advance(PipelineState::Failed).is_ok()
    }
}
