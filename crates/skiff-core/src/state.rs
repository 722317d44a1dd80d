//! Sandbox lifecycle state machine.
//!
//! The transition table here is the single source of adjacency truth; no
//! other module encodes which states neighbour which. The one sanctioned
//! bypass is teardown: the manager's destroy path writes `Destroyed`
//! directly so that cleanup can never be blocked by a lifecycle check.

use crate::error::{Result, SandboxError};
use std::fmt;

/// Current lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxState {
    /// Container is being created.
    Creating,
    /// Container started, first-time bootstrap running.
    Initializing,
    /// Warm and waiting in the ready queue.
    Ready,
    /// Leased to a session.
    Executing,
    /// Released, awaiting promotion or the idle reaper.
    Idle,
    /// Parked; must re-initialize before use.
    Suspended,
    /// Sink for failed creation or execution; recreate or destroy.
    Error,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Executing => write!(f, "Executing"),
            Self::Idle => write!(f, "Idle"),
            Self::Suspended => write!(f, "Suspended"),
            Self::Error => write!(f, "Error"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Whether `from -> to` is a legal lifecycle transition.
pub fn can_transition(from: SandboxState, to: SandboxState) -> bool {
    use SandboxState::*;
    matches!(
        (from, to),
        (Creating, Initializing)
            | (Creating, Error)
            | (Creating, Destroyed)
            | (Initializing, Ready)
            | (Initializing, Error)
            | (Initializing, Destroyed)
            | (Ready, Executing)
            | (Ready, Destroyed)
            | (Executing, Idle)
            | (Executing, Error)
            | (Executing, Destroyed)
            | (Idle, Ready)
            | (Idle, Suspended)
            | (Idle, Destroyed)
            | (Suspended, Initializing)
            | (Suspended, Destroyed)
            | (Error, Creating)
            | (Error, Destroyed)
    )
}

/// Validate a transition, returning the new state.
pub fn transition(from: SandboxState, to: SandboxState) -> Result<SandboxState> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(SandboxError::InvalidTransition { from, to })
    }
}
