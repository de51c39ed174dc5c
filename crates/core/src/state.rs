//! Per-direction pipeline lifecycle.
//!
//! ```text
//!          request_start          complete_start
//!   Idle ─────────────▶ Starting ───────────────▶ Running
//!    ▲                     │                         │
//!    │      abort_start    │                         │ request_stop
//!    ├─────────────────────┘                         ▼
//!    └──────────────────────────────────────── Stopping
//!                     complete_stop
//! ```
//!
//! Requests arriving in the wrong state are benign no-ops and report
//! [`RequestOutcome::Ignored`]. Completions arriving in the wrong state
//! indicate a bookkeeping bug and fail with
//! [`SessionError::InvalidTransition`].

use std::fmt;

use crate::error::{Result, SessionError};
use crate::session::Direction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl PipelineState {
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, target),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Idle)
                | (Running, Stopping)
                | (Stopping, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a start or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The transition was made and work has been scheduled.
    Accepted,
    /// Already in (or heading to) the requested state; nothing was done.
    Ignored(PipelineState),
}

impl RequestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RequestOutcome::Accepted)
    }
}

/// Lifecycle state of one direction.
#[derive(Debug)]
pub struct PipelineStateMachine {
    direction: Direction,
    state: PipelineState,
}

impl PipelineStateMachine {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Idle -> Starting.
    pub fn request_start(&mut self) -> RequestOutcome {
        self.request(PipelineState::Idle, PipelineState::Starting)
    }

    /// Running -> Stopping.
    pub fn request_stop(&mut self) -> RequestOutcome {
        self.request(PipelineState::Running, PipelineState::Stopping)
    }

    /// Starting -> Running, after the graph is built.
    pub fn complete_start(&mut self) -> Result<()> {
        self.complete(PipelineState::Starting, PipelineState::Running)
    }

    /// Starting -> Idle, after graph construction failed.
    pub fn abort_start(&mut self) -> Result<()> {
        self.complete(PipelineState::Starting, PipelineState::Idle)
    }

    /// Stopping -> Idle, after teardown.
    pub fn complete_stop(&mut self) -> Result<()> {
        self.complete(PipelineState::Stopping, PipelineState::Idle)
    }

    fn request(&mut self, from: PipelineState, to: PipelineState) -> RequestOutcome {
        if self.state != from {
            tracing::debug!(
                direction = %self.direction,
                state = %self.state,
                requested = %to,
                "already in requested state, ignoring"
            );
            return RequestOutcome::Ignored(self.state);
        }
        tracing::debug!(direction = %self.direction, from = %from, to = %to, "state transition");
        self.state = to;
        RequestOutcome::Accepted
    }

    fn complete(&mut self, from: PipelineState, to: PipelineState) -> Result<()> {
        if self.state != from || !from.can_transition_to(to) {
            tracing::error!(
                direction = %self.direction,
                state = %self.state,
                expected = %from,
                to = %to,
                "illegal state transition"
            );
            return Err(SessionError::InvalidTransition {
                direction: self.direction,
                from: self.state,
                to,
            });
        }
        tracing::debug!(direction = %self.direction, from = %from, to = %to, "state transition");
        self.state = to;
        Ok(())
    }
}
