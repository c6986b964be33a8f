//! Input interception module
//!
//! Installs a system-wide event tap (CGEventTap on macOS) and decides, per
//! event, whether it passes through or is dropped.

mod auth;
mod engine;
mod filter;
mod keys;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(test)]
pub(crate) mod mock;
pub mod platform;

pub use engine::{EngineError, InterceptionEngine};
