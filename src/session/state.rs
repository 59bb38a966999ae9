//! Session lifecycle state
//!
//! `starting → running → exited`, strictly forward. "Absent" (not in the
//! registry at all) is the implicit fourth state: before the spawn call
//! resolves and after a clean removal.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
///
/// `Starting` spans RPC-confirmed spawn to first observed output; `Running`
/// begins at first output; `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Exited)
    }
}

/// Attempted backward or repeated transition.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// Why a session is being terminated. Recorded once per connect attempt by
/// whichever component initiates the close, consulted once when the exit
/// event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    /// The user closed the tab
    User,
    /// The user confirmed a connect-timeout cancel
    Timeout,
    /// No close was requested on this side (network drop, remote logout, …)
    Unknown,
}

/// Apply a forward-only transition, rejecting regressions and terminal
/// re-entry.
pub fn advance(from: SessionStatus, to: SessionStatus) -> Result<SessionStatus, TransitionError> {
    use SessionStatus::*;
    match (from, to) {
        (Starting, Running) => Ok(Running),
        (Starting, Exited) | (Running, Exited) => Ok(Exited),
        _ => Err(TransitionError { from, to }),
    }
}
