//! Scripted tap backend and authorizer for tests.
//!
//! Lets tests drive the interception engine without an OS event tap: events
//! are injected from the test thread and answered synchronously by the tap
//! thread, just like the real callback.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};

use super::auth::Authorizer;
use super::engine::{EngineError, TapBackend, TapHandler, TapLoop, TapStopper};
use super::filter::Action;
use super::keys::InputEvent;

enum Message {
    Event(InputEvent, SyncSender<Action>),
    Stop,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    released: AtomicUsize,
    reenabled: AtomicUsize,
}

/// Backend whose "OS" is a channel fed by the test
#[derive(Default)]
pub struct MockBackend {
    refuse: AtomicBool,
    feeder: Mutex<Option<Sender<Message>>>,
    counters: Arc<Counters>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail like a refused tap
    pub fn refuse_creation(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Deliver an event and wait for the tap's verdict.
    ///
    /// Returns `None` when no tap is live.
    pub fn inject(&self, event: InputEvent) -> Option<Action> {
        let feeder = self.feeder.lock().unwrap().clone()?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        feeder.send(Message::Event(event, reply_tx)).ok()?;
        reply_rx.recv().ok()
    }

    pub fn taps_created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn taps_released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn reenables(&self) -> usize {
        self.counters.reenabled.load(Ordering::SeqCst)
    }
}

impl TapBackend for MockBackend {
    fn create(&self, handler: TapHandler) -> Result<Box<dyn TapLoop>, EngineError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::ResourceCreation("mock tap refused".to_string()));
        }

        let (tx, rx) = mpsc::channel();
        *self.feeder.lock().unwrap() = Some(tx.clone());
        self.counters.created.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockTap {
            handler,
            rx,
            tx,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockTap {
    handler: TapHandler,
    rx: Receiver<Message>,
    tx: Sender<Message>,
    counters: Arc<Counters>,
}

impl TapLoop for MockTap {
    fn stopper(&self) -> Box<dyn TapStopper> {
        Box::new(MockStopper {
            tx: Mutex::new(self.tx.clone()),
        })
    }

    fn run(self: Box<Self>) {
        let MockTap {
            handler,
            rx,
            tx,
            counters,
        } = *self;
        drop(tx);

        while let Ok(message) = rx.recv() {
            match message {
                Message::Event(event, reply) => {
                    let action = handler(&event);
                    if action == Action::Reenable {
                        counters.reenabled.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = reply.send(action);
                }
                Message::Stop => break,
            }
        }

        counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockStopper {
    tx: Mutex<Sender<Message>>,
}

impl TapStopper for MockStopper {
    fn stop(&self) {
        let _ = self.tx.lock().unwrap().send(Message::Stop);
    }
}

/// Authorizer with a switchable answer
pub struct MockAuthorizer {
    authorized: AtomicBool,
    prompts: AtomicUsize,
}

impl MockAuthorizer {
    pub fn new(authorized: bool) -> Self {
        Self {
            authorized: AtomicBool::new(authorized),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Authorizer for MockAuthorizer {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn prompt_for_authorization(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}
