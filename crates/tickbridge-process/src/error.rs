//! Process lifecycle errors.

use crate::process::{Pid, ProcessState};
use crate::world::ComputerId;
use thiserror::Error;

/// Errors raised by process trees and the world.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// No process with this pid.
    #[error("unknown process {0}")]
    UnknownPid(Pid),

    /// No computer with this id.
    #[error("unknown computer {0}")]
    UnknownComputer(ComputerId),

    /// The state machine forbids this transition.
    #[error("invalid process transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: ProcessState,
        /// Requested state.
        to: ProcessState,
    },

    /// Every pid up to the configured maximum is taken.
    #[error("no free pid (limit {0})")]
    PidsExhausted(u32),

    /// A snapshot could not be linked back into a tree.
    #[error("snapshot link error: {0}")]
    Link(String),
}

/// Result type for process operations.
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;
