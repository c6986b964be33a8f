//! Input event model and fixed hotkey definitions
//!
//! Platform backends translate their native events into `InputEvent` so the
//! filtering logic never touches OS types.

/// macOS virtual keycodes used by the hotkeys
pub mod keycodes {
    /// Escape: first key of the toggle combo, base key of the failsafe
    pub const ESCAPE: u16 = 0x35;
    /// Delete (backspace): second key of the toggle combo
    pub const DELETE: u16 = 0x33;
}

/// Modifier flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    /// Fn (secondary function) modifier flag
    pub const SECONDARY_FN: CGEventFlags = CGEventFlags::CGEventFlagSecondaryFn;
}

/// Kind of an observed input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    FlagsChanged,
    MouseMoved,
    LeftMouseDown,
    LeftMouseUp,
    LeftMouseDragged,
    RightMouseDown,
    RightMouseUp,
    RightMouseDragged,
    OtherMouseDown,
    OtherMouseUp,
    OtherMouseDragged,
    ScrollWheel,
    /// The OS disabled the tap because a callback was too slow
    TapDisabledByTimeout,
    /// The OS disabled the tap on user request (secure input and friends)
    TapDisabledByUserInput,
    /// Anything else, carrying the raw platform type
    Other(u32),
}

impl EventKind {
    /// Categories suppressed while locked
    pub const MONITORED: [EventKind; 14] = [
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::FlagsChanged,
        EventKind::MouseMoved,
        EventKind::LeftMouseDown,
        EventKind::LeftMouseUp,
        EventKind::LeftMouseDragged,
        EventKind::RightMouseDown,
        EventKind::RightMouseUp,
        EventKind::RightMouseDragged,
        EventKind::OtherMouseDown,
        EventKind::OtherMouseUp,
        EventKind::OtherMouseDragged,
        EventKind::ScrollWheel,
    ];

    pub fn is_monitored(self) -> bool {
        Self::MONITORED.contains(&self)
    }

    pub fn is_tap_disabled(self) -> bool {
        matches!(
            self,
            EventKind::TapDisabledByTimeout | EventKind::TapDisabledByUserInput
        )
    }
}

/// Modifier flags the hotkeys care about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Fn key is held
    pub secondary_fn: bool,
}

impl ModifierState {
    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(event_flags: core_graphics::event::CGEventFlags) -> Self {
        Self {
            secondary_fn: event_flags.contains(flags::SECONDARY_FN),
        }
    }

    /// Only the Fn flag
    #[cfg(test)]
    pub fn secondary_fn() -> Self {
        Self { secondary_fn: true }
    }
}

/// A platform-neutral input event as seen by the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Virtual keycode; zero for non-keyboard events
    pub keycode: u16,
    pub modifiers: ModifierState,
}

impl InputEvent {
    /// A non-keyboard event of the given kind
    #[cfg(any(target_os = "macos", test))]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            keycode: 0,
            modifiers: ModifierState::default(),
        }
    }

    #[cfg(test)]
    pub fn key_down(keycode: u16, modifiers: ModifierState) -> Self {
        Self {
            kind: EventKind::KeyDown,
            keycode,
            modifiers,
        }
    }

    #[cfg(test)]
    pub fn key_up(keycode: u16, modifiers: ModifierState) -> Self {
        Self {
            kind: EventKind::KeyUp,
            keycode,
            modifiers,
        }
    }

    /// Escape pressed with Fn held
    pub fn is_failsafe(&self) -> bool {
        self.kind == EventKind::KeyDown
            && self.keycode == keycodes::ESCAPE
            && self.modifiers.secondary_fn
    }
}
