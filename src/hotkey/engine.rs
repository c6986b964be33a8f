//! Interception engine
//!
//! Owns the lifetime of the OS event tap. The tap runs on a dedicated
//! thread with its own run loop and calls `filter::decide` for every event.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::events::ChangeReason;
use crate::state::LockController;

use super::auth::Authorizer;
use super::filter::{decide, Action};
use super::keys::InputEvent;

/// Per-event callback handed to the backend
pub type TapHandler = Arc<dyn Fn(&InputEvent) -> Action + Send + Sync>;

/// Platform hook that creates the OS event tap
pub trait TapBackend: Send + Sync + 'static {
    /// Create the tap on the calling thread. Called from the tap thread.
    fn create(&self, handler: TapHandler) -> Result<Box<dyn TapLoop>, EngineError>;
}

/// A created tap, owned by the tap thread
pub trait TapLoop {
    /// Handle used to stop `run` from another thread
    fn stopper(&self) -> Box<dyn TapStopper>;

    /// Pump events until stopped, then disable and release the tap
    fn run(self: Box<Self>);
}

pub trait TapStopper: Send {
    fn stop(&self);
}

/// Errors that can occur when starting interception
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("input monitoring is not authorized - check Accessibility permissions")]
    Authorization,

    #[error("failed to create event tap: {0}")]
    ResourceCreation(String),

    #[error("failed to spawn tap thread: {0}")]
    ThreadSpawn(String),
}

struct ActiveTap {
    stopper: Box<dyn TapStopper>,
    thread: JoinHandle<()>,
}

/// Starts and stops the system-wide input tap
pub struct InterceptionEngine {
    controller: LockController,
    authorizer: Arc<dyn Authorizer>,
    backend: Arc<dyn TapBackend>,
    active: Mutex<Option<ActiveTap>>,
}

impl InterceptionEngine {
    pub fn new(
        controller: LockController,
        authorizer: Arc<dyn Authorizer>,
        backend: Arc<dyn TapBackend>,
    ) -> Self {
        Self {
            controller,
            authorizer,
            backend,
            active: Mutex::new(None),
        }
    }

    /// Current OS-granted capability, never cached
    pub fn check_authorization(&self) -> bool {
        self.authorizer.is_authorized()
    }

    /// Surface the OS consent prompt. Does not retry `start`.
    pub fn request_authorization(&self) {
        info!("requesting input monitoring authorization");
        self.authorizer.prompt_for_authorization();
    }

    /// Whether a tap is currently live
    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Start intercepting input.
    ///
    /// Succeeds without doing anything if a tap is already live. Blocks until
    /// the tap thread has either created the tap or reported why it could not.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut active = self.lock_active();
        if active.is_some() {
            debug!("interception already active");
            return Ok(());
        }

        if !self.check_authorization() {
            warn!("cannot start interception: not authorized");
            return Err(EngineError::Authorization);
        }

        self.controller.force_unlock(ChangeReason::Startup);

        let controller = self.controller.clone();
        let handler: TapHandler = Arc::new(move |event: &InputEvent| decide(event, &controller));
        let backend = Arc::clone(&self.backend);
        let live = self.controller.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name("input-tap".to_string())
            .spawn(move || {
                let tap = match backend.create(handler) {
                    Ok(tap) => tap,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Set before the loop runs so the first toggle combo can lock.
                live.set_intercepting(true);
                if ready_tx.send(Ok(tap.stopper())).is_err() {
                    live.set_intercepting(false);
                    return;
                }

                info!("tap thread started");
                tap.run();
                info!("tap thread stopped");
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        let stopper = match ready_rx.recv() {
            Ok(Ok(stopper)) => stopper,
            Ok(Err(e)) => {
                let _ = thread.join();
                error!(%e, "failed to start interception");
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                error!("tap thread exited before reporting");
                return Err(EngineError::ResourceCreation(
                    "tap thread exited before reporting".to_string(),
                ));
            }
        };

        *active = Some(ActiveTap { stopper, thread });
        info!("interception started");
        Ok(())
    }

    /// Stop intercepting input.
    ///
    /// The lock is forced off before the tap is released, and this runs
    /// whether or not a tap was live.
    pub fn stop(&self) {
        let active = self.lock_active().take();

        self.controller.set_intercepting(false);
        self.controller.force_unlock(ChangeReason::Shutdown);

        let Some(ActiveTap { stopper, thread }) = active else {
            debug!("interception was not active");
            return;
        };

        stopper.stop();
        if thread.join().is_err() {
            error!("tap thread panicked");
        }
        info!("interception stopped");
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTap>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InterceptionEngine {
    fn drop(&mut self) {
        if self.is_active() {
            self.stop();
        }
    }
}
