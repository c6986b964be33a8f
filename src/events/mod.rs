//! Lock state notifications
//!
//! The controller emits one `LockEvent` per state change. The UI shell and
//! IPC subscribers receive them on the async side of the daemon.

use serde::{Deserialize, Serialize};

/// What caused a lock state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// Toggle combo or a toggle request from the UI shell
    Toggle,
    /// Failsafe combination observed by the tap
    Failsafe,
    /// Auto-unlock timer elapsed
    Timeout,
    /// Interception engine stopped
    Shutdown,
    /// Interception engine started
    Startup,
    /// Explicit unlock requested over IPC
    Request,
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeReason::Toggle => write!(f, "toggle"),
            ChangeReason::Failsafe => write!(f, "failsafe"),
            ChangeReason::Timeout => write!(f, "timeout"),
            ChangeReason::Shutdown => write!(f, "shutdown"),
            ChangeReason::Startup => write!(f, "startup"),
            ChangeReason::Request => write!(f, "request"),
        }
    }
}

/// Events emitted by the lock controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockEvent {
    /// Locked flag was written. Fired on every unlock, even a redundant one.
    LockStateChanged {
        locked: bool,
        reason: ChangeReason,
    },
}

impl LockEvent {
    /// New lock value carried by this event
    pub fn locked(&self) -> bool {
        match self {
            LockEvent::LockStateChanged { locked, .. } => *locked,
        }
    }
}

impl std::fmt::Display for LockEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockEvent::LockStateChanged { locked: true, reason } => {
                write!(f, "LOCKED ({})", reason)
            }
            LockEvent::LockStateChanged { locked: false, reason } => {
                write!(f, "UNLOCKED ({})", reason)
            }
        }
    }
}
