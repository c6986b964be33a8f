//! Signal handling for graceful shutdown
//!
//! Any of these signals ends the daemon through the normal path, which
//! stops the engine and therefore unlocks input before exit.

use std::future::poll_fn;
use std::task::Poll;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Signal that ended the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Terminate,
    Interrupt,
    Hangup,
    Quit,
}

impl ShutdownCause {
    /// Every signal the daemon treats as a shutdown request
    pub const ALL: [ShutdownCause; 4] = [
        ShutdownCause::Terminate,
        ShutdownCause::Interrupt,
        ShutdownCause::Hangup,
        ShutdownCause::Quit,
    ];

    fn kind(self) -> SignalKind {
        match self {
            ShutdownCause::Terminate => SignalKind::terminate(),
            ShutdownCause::Interrupt => SignalKind::interrupt(),
            ShutdownCause::Hangup => SignalKind::hangup(),
            ShutdownCause::Quit => SignalKind::quit(),
        }
    }
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownCause::Terminate => write!(f, "SIGTERM"),
            ShutdownCause::Interrupt => write!(f, "SIGINT"),
            ShutdownCause::Hangup => write!(f, "SIGHUP"),
            ShutdownCause::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Registered handlers for the shutdown signals
///
/// Handlers are installed on construction, so a signal that arrives before
/// `wait` is polled is still observed.
#[derive(Debug)]
pub struct ShutdownSignal {
    streams: Vec<(ShutdownCause, Signal)>,
}

impl ShutdownSignal {
    /// Listen for SIGTERM, SIGINT, SIGHUP and SIGQUIT
    pub fn new() -> std::io::Result<Self> {
        Self::listen(&ShutdownCause::ALL)
    }

    /// Listen for the given signals only. Must run inside a tokio runtime.
    pub fn listen(causes: &[ShutdownCause]) -> std::io::Result<Self> {
        let streams = causes
            .iter()
            .map(|&cause| Ok((cause, signal(cause.kind())?)))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self { streams })
    }

    /// Resolve with the first shutdown signal received
    pub async fn wait(&mut self) -> ShutdownCause {
        let cause = poll_fn(|cx| {
            for (cause, stream) in self.streams.iter_mut() {
                if stream.poll_recv(cx).is_ready() {
                    return Poll::Ready(*cause);
                }
            }
            Poll::Pending
        })
        .await;

        debug!(%cause, "shutdown signal received");
        cause
    }
}
