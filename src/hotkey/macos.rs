//! macOS backend: CGEventTap on a dedicated CFRunLoop
//!
//! The tap is an active filter (`CGEventTapOptions::Default`), so returning
//! `None` from the callback drops the event for every other application.
//! Creating it requires the Accessibility permission.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::runloop::{
    kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource,
};
use core_foundation::string::CFString;
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventTapProxy, CGEventType, EventField,
};
use tracing::{debug, info, warn};

use super::auth::Authorizer;
use super::engine::{EngineError, TapBackend, TapHandler, TapLoop, TapStopper};
use super::filter::Action;
use super::keys::{EventKind, InputEvent, ModifierState};

extern "C" {
    fn CGEventTapEnable(tap: *mut c_void, enable: bool);
}

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
}

/// How long one run loop pass may block before the stop flag is checked
const RUN_LOOP_SLICE: Duration = Duration::from_millis(100);

const MONITORED_TYPES: [CGEventType; 14] = [
    CGEventType::KeyDown,
    CGEventType::KeyUp,
    CGEventType::FlagsChanged,
    CGEventType::MouseMoved,
    CGEventType::LeftMouseDown,
    CGEventType::LeftMouseUp,
    CGEventType::LeftMouseDragged,
    CGEventType::RightMouseDown,
    CGEventType::RightMouseUp,
    CGEventType::RightMouseDragged,
    CGEventType::OtherMouseDown,
    CGEventType::OtherMouseUp,
    CGEventType::OtherMouseDragged,
    CGEventType::ScrollWheel,
];

/// Accessibility-based authorization
pub struct AccessibilityAuthorizer;

impl Authorizer for AccessibilityAuthorizer {
    fn is_authorized(&self) -> bool {
        process_trusted(false)
    }

    fn prompt_for_authorization(&self) {
        let trusted = process_trusted(true);
        debug!(trusted, "accessibility prompt requested");
    }
}

fn process_trusted(prompt: bool) -> bool {
    let key = CFString::new("AXTrustedCheckOptionPrompt");
    let value = if prompt {
        CFBoolean::true_value()
    } else {
        CFBoolean::false_value()
    };
    let options = CFDictionary::from_CFType_pairs(&[(key.as_CFType(), value.as_CFType())]);

    unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
}

/// Session-level CGEventTap
pub struct CgEventTapBackend;

impl TapBackend for CgEventTapBackend {
    fn create(&self, handler: TapHandler) -> Result<Box<dyn TapLoop>, EngineError> {
        // Filled in once the tap exists; the callback needs it to re-enable.
        let port = Arc::new(AtomicPtr::new(std::ptr::null_mut()));
        let callback_port = Arc::clone(&port);

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            match handler(&translate(event_type, event)) {
                Action::Propagate => Some(event.clone()),
                Action::Consume => None,
                Action::Reenable => {
                    set_tap_enabled(&callback_port, true);
                    Some(event.clone())
                }
            }
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            MONITORED_TYPES.to_vec(),
            callback,
        )
        .map_err(|_| {
            EngineError::ResourceCreation(
                "CGEventTapCreate returned null - is Accessibility permission granted?"
                    .to_string(),
            )
        })?;

        port.store(
            tap.mach_port.as_concrete_TypeRef() as *mut c_void,
            Ordering::SeqCst,
        );

        let source = tap.mach_port.create_runloop_source(0).map_err(|_| {
            EngineError::ResourceCreation("failed to create run loop source".to_string())
        })?;

        Ok(Box::new(MacTapLoop {
            tap,
            source,
            port,
            run_loop: CFRunLoop::get_current(),
            running: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct MacTapLoop {
    tap: CGEventTap<'static>,
    source: CFRunLoopSource,
    port: Arc<AtomicPtr<c_void>>,
    run_loop: CFRunLoop,
    running: Arc<AtomicBool>,
}

impl TapLoop for MacTapLoop {
    fn stopper(&self) -> Box<dyn TapStopper> {
        Box::new(MacTapStopper {
            run_loop: self.run_loop.clone(),
            running: Arc::clone(&self.running),
        })
    }

    fn run(self: Box<Self>) {
        unsafe {
            self.run_loop.add_source(&self.source, kCFRunLoopCommonModes);
        }
        self.tap.enable();
        info!("event tap created and enabled");

        while self.running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, true);
            }
        }

        set_tap_enabled(&self.port, false);
        self.port.store(std::ptr::null_mut(), Ordering::SeqCst);
        unsafe {
            self.run_loop
                .remove_source(&self.source, kCFRunLoopCommonModes);
        }
        info!("event tap disabled");
        // The mach port is released when `self.tap` drops.
    }
}

struct MacTapStopper {
    run_loop: CFRunLoop,
    running: Arc<AtomicBool>,
}

impl TapStopper for MacTapStopper {
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.run_loop.stop();
    }
}

fn set_tap_enabled(port: &AtomicPtr<c_void>, enable: bool) {
    let port = port.load(Ordering::SeqCst);
    if port.is_null() {
        warn!(enable, "event tap port not available");
        return;
    }
    unsafe {
        CGEventTapEnable(port, enable);
    }
}

fn translate(event_type: CGEventType, event: &CGEvent) -> InputEvent {
    let kind = match event_type {
        CGEventType::KeyDown => EventKind::KeyDown,
        CGEventType::KeyUp => EventKind::KeyUp,
        CGEventType::FlagsChanged => EventKind::FlagsChanged,
        CGEventType::MouseMoved => EventKind::MouseMoved,
        CGEventType::LeftMouseDown => EventKind::LeftMouseDown,
        CGEventType::LeftMouseUp => EventKind::LeftMouseUp,
        CGEventType::LeftMouseDragged => EventKind::LeftMouseDragged,
        CGEventType::RightMouseDown => EventKind::RightMouseDown,
        CGEventType::RightMouseUp => EventKind::RightMouseUp,
        CGEventType::RightMouseDragged => EventKind::RightMouseDragged,
        CGEventType::OtherMouseDown => EventKind::OtherMouseDown,
        CGEventType::OtherMouseUp => EventKind::OtherMouseUp,
        CGEventType::OtherMouseDragged => EventKind::OtherMouseDragged,
        CGEventType::ScrollWheel => EventKind::ScrollWheel,
        CGEventType::TapDisabledByTimeout => EventKind::TapDisabledByTimeout,
        CGEventType::TapDisabledByUserInput => EventKind::TapDisabledByUserInput,
        other => EventKind::Other(other as u32),
    };

    match kind {
        EventKind::KeyDown | EventKind::KeyUp | EventKind::FlagsChanged => InputEvent {
            kind,
            keycode: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
            modifiers: ModifierState::from_flags(event.get_flags()),
        },
        _ => InputEvent::new(kind),
    }
}
