//! Lock state controller
//!
//! Sole owner of the locked flag, the toggle-combo hold flag and the
//! auto-unlock timer. The tap thread and the async side both call in here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{ChangeReason, LockEvent};

/// Default auto-unlock delay
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Cheap, cloneable handle to the shared lock state
#[derive(Clone)]
pub struct LockController {
    shared: Arc<Shared>,
}

struct Shared {
    /// Read lock-free on every event; only written while `timer` is held
    locked: AtomicBool,
    /// First key of the toggle combo is down
    modifier_held: AtomicBool,
    /// Interception engine has a live tap
    intercepting: AtomicBool,
    /// Serialises every write to `locked` with the timer bookkeeping
    timer: Mutex<TimerSlot>,
    timeout: Duration,
    event_tx: broadcast::Sender<LockEvent>,
    /// Async context that owns the timer tasks
    scheduler: Handle,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    pending: Option<PendingTimeout>,
}

struct PendingTimeout {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerSlot {
    fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(generation = pending.generation, "auto-unlock timer cancelled");
            pending.task.abort();
        }
    }
}

impl LockController {
    /// Create a controller in the unlocked state.
    ///
    /// A zero `timeout` disables the auto-unlock timer. Timer tasks are
    /// spawned on `scheduler`, so toggles coming from the tap thread still
    /// schedule onto the async side.
    pub fn new(
        timeout: Duration,
        event_tx: broadcast::Sender<LockEvent>,
        scheduler: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                locked: AtomicBool::new(false),
                modifier_held: AtomicBool::new(false),
                intercepting: AtomicBool::new(false),
                timer: Mutex::new(TimerSlot::default()),
                timeout,
                event_tx,
                scheduler,
            }),
        }
    }

    /// Current lock state
    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::SeqCst)
    }

    /// Whether the first key of the toggle combo is currently held
    pub fn modifier_held(&self) -> bool {
        self.shared.modifier_held.load(Ordering::SeqCst)
    }

    pub fn set_modifier_held(&self, held: bool) {
        self.shared.modifier_held.store(held, Ordering::SeqCst);
    }

    /// Configured auto-unlock delay (zero when disabled)
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Whether the interception engine currently owns a live tap
    pub fn is_intercepting(&self) -> bool {
        self.shared.intercepting.load(Ordering::SeqCst)
    }

    /// Called by the engine around the lifetime of its tap.
    pub(crate) fn set_intercepting(&self, active: bool) {
        self.shared.intercepting.store(active, Ordering::SeqCst);
    }

    /// Subscribe to lock state notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Flip the lock state and return the new value.
    ///
    /// Locking (re)arms the auto-unlock timer, unlocking cancels it. Locking
    /// is refused while no tap is live, since nothing would enforce it.
    pub fn toggle(&self) -> bool {
        let mut timer = self.lock_timer();
        let locked = !self.is_locked();

        if locked {
            if !self.is_intercepting() {
                warn!("toggle ignored: interception is not active");
                return false;
            }
            self.shared.locked.store(true, Ordering::SeqCst);
            self.arm_timeout(&mut timer);
        } else {
            timer.cancel();
            self.shared.locked.store(false, Ordering::SeqCst);
        }

        info!(locked, "lock toggled");
        self.notify(locked, ChangeReason::Toggle);
        locked
    }

    /// Unconditionally unlock, clear the combo hold and cancel the timer.
    ///
    /// Always notifies, even when already unlocked. Failsafe, timeout and
    /// shutdown all end up here.
    pub fn force_unlock(&self, reason: ChangeReason) {
        let mut timer = self.lock_timer();
        self.unlock(&mut timer, reason);
    }

    fn unlock(&self, timer: &mut TimerSlot, reason: ChangeReason) {
        timer.cancel();
        let was_locked = self.shared.locked.swap(false, Ordering::SeqCst);
        self.shared.modifier_held.store(false, Ordering::SeqCst);

        info!(%reason, was_locked, "forced unlock");
        self.notify(false, reason);
    }

    fn arm_timeout(&self, timer: &mut TimerSlot) {
        timer.cancel();

        let timeout = self.shared.timeout;
        if timeout.is_zero() {
            return;
        }

        timer.generation = timer.generation.wrapping_add(1);
        let generation = timer.generation;
        let shared = Arc::downgrade(&self.shared);

        let task = self.shared.scheduler.spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(shared, generation);
        });

        debug!(generation, timeout_secs = timeout.as_secs(), "auto-unlock timer armed");
        timer.pending = Some(PendingTimeout { generation, task });
    }

    fn notify(&self, locked: bool, reason: ChangeReason) {
        // No receivers is fine: the UI shell may not be attached yet.
        let _ = self
            .shared
            .event_tx
            .send(LockEvent::LockStateChanged { locked, reason });
    }

    fn lock_timer(&self) -> MutexGuard<'_, TimerSlot> {
        self.shared
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer callback. A generation mismatch means the lock it was armed for
/// already ended, so it must not fire a second notification.
fn expire(shared: Weak<Shared>, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let controller = LockController { shared };
    let mut timer = controller.lock_timer();

    match timer.pending.as_ref() {
        Some(pending) if pending.generation == generation => {
            timer.pending = None;
            info!("auto-unlock timer elapsed");
            controller.unlock(&mut timer, ChangeReason::Timeout);
        }
        _ => debug!(generation, "stale auto-unlock timer ignored"),
    }
}
