//! Authorization to observe global input
//!
//! The engine only ever asks "authorized or not" and can surface the OS
//! prompt. Granting happens outside the daemon.

/// External capability provider for global input monitoring
pub trait Authorizer: Send + Sync {
    /// Whether the process may currently install an input tap
    fn is_authorized(&self) -> bool;

    /// Show the OS consent prompt, if there is one
    fn prompt_for_authorization(&self);
}
