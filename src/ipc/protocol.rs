//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::LockEvent;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Flip the lock state
    Toggle,

    /// Unlock unconditionally
    ForceUnlock,

    /// Show the OS permission prompt
    RequestAuthorization,

    /// (Re)try starting interception, e.g. after the user granted access
    StartInterception,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to lock state notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Lock state after a toggle or unlock request
    LockState { locked: bool },

    /// Permission prompt was shown
    AuthorizationRequested,

    /// Interception is running
    InterceptionStarted,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Lock state changed
    LockEvent { event: LockEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Input is currently being blocked
    pub locked: bool,

    /// Event tap is live
    pub intercepting: bool,

    /// Input monitoring permission is granted
    pub authorized: bool,

    /// Auto-unlock delay, zero when disabled
    pub lock_timeout_secs: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            locked: false,
            intercepting: false,
            authorized: false,
            lock_timeout_secs: 0,
            uptime_secs: 0,
        }
    }
}
