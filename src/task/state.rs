//! Task Lifecycle States
//!
//! Tasks move forward along `FUTURE -> WAITING -> READY -> COMPLETED`.
//! `CANCELLED` and `ERROR` are terminal and reachable from any
//! non-terminal state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, entry condition not evaluated yet
    Future,
    /// Blocked on an event, a join, or nested work
    Waiting,
    /// Eligible for execution
    Ready,
    /// Executed successfully
    Completed,
    /// Cancelled by a competing path or by the host
    Cancelled,
    /// Execution or evaluation failed
    Error,
}

impl TaskState {
    /// Position on the main path; terminal off-path states have none.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Future => Some(0),
            Self::Waiting => Some(1),
            Self::Ready => Some(2),
            Self::Completed => Some(3),
            Self::Cancelled | Self::Error => None,
        }
    }

    /// Returns true for states no task ever leaves.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    /// Checks whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self.is_finished() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            // Cancellation and error are reachable from any live state
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Future => "FUTURE",
            Self::Waiting => "WAITING",
            Self::Ready => "READY",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}
