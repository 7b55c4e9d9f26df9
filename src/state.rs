//! The per-request state machine.
//!
//! ```text
//! Idle ─▶ Decoded ─▶ CacheChecked ─┬─▶ Fetching ─▶ Fetched ─┐
//!            │                     └─▶ CacheHit ────────────┤
//!            ▼                                              ▼
//!        Rejected ◀───────────────────────────────────  Classified
//!                                                           │
//!                                                  ProtectionChecked
//!                                                     │          │
//!                                          PasswordRequired   Dispatching
//!                                                              │       │
//!                                                        Converted  ConversionFailed
//! ```
//!
//! Every state may also jump straight to the terminal `Outcome` when a stage
//! fails or when no further processing is needed.

use crate::error::PreviewError;
use crate::observer::PipelineObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A node of the preview state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Decoded,
    CacheChecked,
    Fetching,
    Fetched,
    CacheHit,
    Classified,
    Rejected,
    ProtectionChecked,
    PasswordRequired,
    Dispatching,
    Converted,
    ConversionFailed,
    /// Terminal.
    Outcome,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        self == PipelineState::Outcome
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if next == Outcome {
            return self != Outcome;
        }
        matches!(
            (self, next),
            (Idle, Decoded)
                | (Decoded, CacheChecked)
                | (Decoded, Rejected)
                | (CacheChecked, Fetching)
                | (CacheChecked, CacheHit)
                | (Fetching, Fetched)
                | (Fetched, Classified)
                | (CacheHit, Classified)
                | (Classified, Rejected)
                | (Classified, ProtectionChecked)
                | (ProtectionChecked, PasswordRequired)
                | (ProtectionChecked, Dispatching)
                | (Dispatching, Converted)
                | (Dispatching, ConversionFailed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the current state of one run and reports every move.
pub(crate) struct StateTracker {
    current: PipelineState,
    observer: Option<Arc<dyn PipelineObserver>>,
    history: Vec<PipelineState>,
}

impl StateTracker {
    pub(crate) fn new(observer: Option<Arc<dyn PipelineObserver>>) -> Self {
        Self {
            current: PipelineState::Idle,
            observer,
            history: vec![PipelineState::Idle],
        }
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.current
    }

    pub(crate) fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`, refusing transitions the machine does not allow.
    pub(crate) fn advance(&mut self, next: PipelineState) -> Result<(), PreviewError> {
        let from = self.current;
        if !from.can_transition_to(next) {
            return Err(PreviewError::Internal(format!(
                "illegal state transition {from} → {next}"
            )));
        }
        debug!("state {} → {}", from, next);
        if let Some(ref obs) = self.observer {
            obs.on_transition(from, next);
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Enter the terminal state. A no-op if already terminal.
    pub(crate) fn finish(&mut self) {
        if !self.current.is_terminal() {
            // Outcome is reachable from every non-terminal state.
            let _ = self.advance(PipelineState::Outcome);
        }
    }
}
