//! Lock state module
//!
//! The controller is the single writer of the locked flag:
//! - Unlocked: all input passes through
//! - Locked: monitored input is suppressed until toggled off, the failsafe
//!   fires, the auto-unlock timer elapses or the engine stops

mod controller;

pub use controller::{LockController, DEFAULT_LOCK_TIMEOUT};
