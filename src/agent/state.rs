//! Turn state machine
//!
//! Valid transitions:
//!
//! ```text
//! 1.  Idle         → Retrieving    (on: Start)
//! 2.  Retrieving   → Generating    (on: ContextReady)
//! 3.  Generating   → ToolDispatch  (on: ToolsRequested)
//! 4.  ToolDispatch → Generating    (on: ToolsComplete | RoundLimitReached)
//! 5.  Generating   → Done          (on: Persisted)
//! 6.  Done         → Done          (terminal)
//! 7.  Failed       → Failed        (terminal)
//! 8.  *            → Failed        (on: Failure)
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, Result};

/// Phase of one agent turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnState {
    /// Request accepted, nothing done yet
    Idle,

    /// Knowledge and memory lookups in flight
    Retrieving,

    /// Executing tools the model asked for
    ToolDispatch,

    /// Waiting on the model
    Generating,

    /// Response produced and turn persisted (terminal)
    Done,

    /// Turn aborted, nothing persisted (terminal)
    Failed,
}

/// Events that drive a turn forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    Start,
    ContextReady,
    ToolsRequested,
    ToolsComplete,
    RoundLimitReached,
    Persisted,
    Failure,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }

    /// Apply an event, rejecting edges the machine does not have
    pub fn transition(&self, event: TurnEvent) -> Result<TurnState> {
        use TurnEvent::*;
        use TurnState::*;

        if event == Failure {
            return Ok(Failed);
        }

        let next = match (self, event) {
            (Idle, Start) => Retrieving,
            (Retrieving, ContextReady) => Generating,
            (Generating, ToolsRequested) => ToolDispatch,
            (ToolDispatch, ToolsComplete) | (ToolDispatch, RoundLimitReached) => Generating,
            (Generating, Persisted) => Done,

            (Done, _) => Done,
            (Failed, _) => Failed,

            (from, event) => {
                return Err(AgentError::InvalidTransition {
                    from: format!("{:?}", from),
                    to: format!("(via {:?})", event),
                    reason: format!("No valid transition from {:?} on {:?}", from, event),
                });
            }
        };

        Ok(next)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TurnState::Idle => "Idle",
            TurnState::Retrieving => "Retrieving",
            TurnState::ToolDispatch => "Dispatching Tools",
            TurnState::Generating => "Generating",
            TurnState::Done => "Done",
            TurnState::Failed => "Failed",
        }
    }
}

/// Current state plus the path taken to reach it
#[derive(Debug, Clone)]
pub struct TurnTracker {
    state: TurnState,
    history: Vec<TurnState>,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self {
            state: TurnState::Idle,
            history: vec![TurnState::Idle],
        }
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn history(&self) -> &[TurnState] {
        &self.history
    }

    pub fn apply(&mut self, event: TurnEvent) -> Result<TurnState> {
        let next = self.state.transition(event)?;
        if next != self.state {
            tracing::trace!(from = ?self.state, to = ?next, ?event, "turn transition");
            self.history.push(next);
        }
        self.state = next;
        Ok(next)
    }

    /// Move to `Failed`; always succeeds
    pub fn fail(&mut self) {
        if self.state != TurnState::Failed {
            self.history.push(TurnState::Failed);
        }
        self.state = TurnState::Failed;
    }
}
