//! Per-event filtering decision
//!
//! Runs synchronously on the tap thread for every event, so every branch is
//! constant time and nothing here blocks or does I/O.

use tracing::{info, warn};

use crate::events::ChangeReason;
use crate::state::LockController;

use super::keys::{keycodes, EventKind, InputEvent};

/// What the tap should do with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Deliver the event to its destination
    Propagate,
    /// Drop the event
    Consume,
    /// Re-enable the tap, then deliver the event
    Reenable,
}

/// Decide the fate of one event, applying hotkey side effects to `controller`.
pub fn decide(event: &InputEvent, controller: &LockController) -> Action {
    if event.kind.is_tap_disabled() {
        warn!(kind = ?event.kind, "event tap disabled by the OS, re-enabling");
        return Action::Reenable;
    }

    // Ahead of every other branch, whatever the lock state.
    if event.is_failsafe() {
        info!("failsafe combination pressed");
        controller.force_unlock(ChangeReason::Failsafe);
        return Action::Consume;
    }

    if event.keycode == keycodes::ESCAPE {
        match event.kind {
            EventKind::KeyDown => {
                controller.set_modifier_held(true);
                return Action::Propagate;
            }
            EventKind::KeyUp => {
                controller.set_modifier_held(false);
                return Action::Propagate;
            }
            _ => {}
        }
    }

    if event.kind == EventKind::KeyDown
        && event.keycode == keycodes::DELETE
        && controller.modifier_held()
    {
        controller.toggle();
        return Action::Consume;
    }

    if controller.is_locked() && event.kind.is_monitored() {
        Action::Consume
    } else {
        Action::Propagate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LockEvent;
    use crate::hotkey::keys::ModifierState;
    use crate::state::DEFAULT_LOCK_TIMEOUT;
    use tokio::runtime::Handle;
    use tokio::sync::broadcast;

    fn create_controller() -> (LockController, broadcast::Receiver<LockEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let controller = LockController::new(DEFAULT_LOCK_TIMEOUT, tx, Handle::current());
        controller.set_intercepting(true);
        (controller, rx)
    }

    fn failsafe() -> InputEvent {
        InputEvent::key_down(keycodes::ESCAPE, ModifierState::secondary_fn())
    }

    fn plain(keycode: u16) -> (InputEvent, InputEvent) {
        (
            InputEvent::key_down(keycode, ModifierState::default()),
            InputEvent::key_up(keycode, ModifierState::default()),
        )
    }

    #[tokio::test]
    async fn test_unlocked_passes_everything() {
        let (controller, _rx) = create_controller();

        for kind in EventKind::MONITORED {
            let event = InputEvent::new(kind);
            assert_eq!(decide(&event, &controller), Action::Propagate, "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_locked_consumes_every_monitored_kind() {
        let (controller, _rx) = create_controller();
        controller.toggle();

        for kind in EventKind::MONITORED {
            assert_eq!(
                decide(&InputEvent::new(kind), &controller),
                Action::Consume,
                "{:?}",
                kind
            );
        }
    }

    #[tokio::test]
    async fn test_locked_passes_unknown_kinds() {
        let (controller, _rx) = create_controller();
        controller.toggle();

        let event = InputEvent::new(EventKind::Other(29));
        assert_eq!(decide(&event, &controller), Action::Propagate);
    }

    #[tokio::test]
    async fn test_tap_disabled_reenables_without_side_effects() {
        let (controller, _rx) = create_controller();
        controller.toggle();
        controller.set_modifier_held(true);

        for kind in [EventKind::TapDisabledByTimeout, EventKind::TapDisabledByUserInput] {
            assert_eq!(decide(&InputEvent::new(kind), &controller), Action::Reenable);
        }
        assert!(controller.is_locked());
        assert!(controller.modifier_held());
    }

    #[tokio::test]
    async fn test_failsafe_unlocks_from_every_state() {
        let (controller, mut rx) = create_controller();

        // Unlocked
        assert_eq!(decide(&failsafe(), &controller), Action::Consume);
        assert!(!controller.is_locked());

        // Locked
        controller.toggle();
        assert_eq!(decide(&failsafe(), &controller), Action::Consume);
        assert!(!controller.is_locked());

        // Locked with the toggle combo half pressed
        controller.toggle();
        controller.set_modifier_held(true);
        assert_eq!(decide(&failsafe(), &controller), Action::Consume);
        assert!(!controller.is_locked());
        assert!(!controller.modifier_held());

        let failsafe_unlocks = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| {
                *event
                    == LockEvent::LockStateChanged {
                        locked: false,
                        reason: ChangeReason::Failsafe,
                    }
            })
            .count();
        assert_eq!(failsafe_unlocks, 3);
    }

    #[tokio::test]
    async fn test_toggle_combo() {
        let (controller, mut rx) = create_controller();
        let (esc_down, esc_up) = plain(keycodes::ESCAPE);
        let (del_down, del_up) = plain(keycodes::DELETE);

        assert_eq!(decide(&esc_down, &controller), Action::Propagate);
        assert_eq!(decide(&del_down, &controller), Action::Consume);
        assert!(controller.is_locked());

        // Locked now: the rest of the combo is swallowed, except Escape itself.
        assert_eq!(decide(&del_up, &controller), Action::Consume);
        assert_eq!(decide(&esc_up, &controller), Action::Propagate);
        assert!(!controller.modifier_held());

        assert_eq!(
            rx.try_recv().unwrap(),
            LockEvent::LockStateChanged {
                locked: true,
                reason: ChangeReason::Toggle
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_toggle_combo_unlocks_while_locked() {
        let (controller, _rx) = create_controller();
        controller.toggle();
        let (esc_down, _) = plain(keycodes::ESCAPE);
        let (del_down, _) = plain(keycodes::DELETE);

        assert_eq!(decide(&esc_down, &controller), Action::Propagate);
        assert_eq!(decide(&del_down, &controller), Action::Consume);
        assert!(!controller.is_locked());
    }

    #[tokio::test]
    async fn test_delete_without_escape_is_ordinary() {
        let (controller, _rx) = create_controller();
        let (esc_down, esc_up) = plain(keycodes::ESCAPE);
        let (del_down, _) = plain(keycodes::DELETE);

        assert_eq!(decide(&del_down, &controller), Action::Propagate);

        decide(&esc_down, &controller);
        decide(&esc_up, &controller);
        assert_eq!(decide(&del_down, &controller), Action::Propagate);
        assert!(!controller.is_locked());
    }
}
