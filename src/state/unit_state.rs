//! Lifecycle states for a top-level unit of work
//!
//! Only `Pending`, `Active` and `Complete` are ever persisted (derived from
//! the `subtasks` and `completed` fields). `Expanding` exists while discovery
//! is in flight and is reported in logs only.

use std::fmt;

/// Represents where a checkpoint is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Subtasks have not been discovered yet
    Pending,

    /// Discovery is running for this unit
    Expanding,

    /// Subtasks are known and at least one is incomplete
    Active,

    /// Every subtask completed; terminal
    Complete,
}

impl UnitState {
    /// Returns true if this is the terminal state
    ///
    /// There is no failure terminal: failed units stay `Active` and are
    /// retried on the next run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns true if a run would still do work for this unit
    pub fn needs_work(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// A finished unit only leaves `Complete` for a forced rediscovery, and
    /// comes back to it afterwards since completion is never cleared.
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Pending, Expanding)
                | (Active, Expanding)
                | (Complete, Expanding)
                | (Expanding, Pending)
                | (Expanding, Active)
                | (Expanding, Complete)
                | (Active, Complete)
                | (Pending, Pending)
                | (Active, Active)
                | (Complete, Complete)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Expanding => "expanding",
            Self::Active => "active",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
