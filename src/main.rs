//! inputlock-daemon: Background daemon that blocks keyboard and mouse input
//!
//! This daemon runs as a LaunchAgent and provides:
//! - System-wide input interception via CGEventTap
//! - Lock state controller with toggle combo, failsafe and auto-unlock timer
//! - IPC server for menu bar app communication
//!
//! Hotkeys:
//! - Hold Escape, press Delete: toggle the lock
//! - Fn + Escape: unlock, always

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::LockEvent;
use crate::hotkey::{platform, InterceptionEngine};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::LockController;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "inputlock-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        lock_timeout_secs = config.lock_timeout.as_secs(),
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Controller -> UI shell and IPC subscribers
    let (event_tx, _) = broadcast::channel::<LockEvent>(64);
    let controller = LockController::new(config.lock_timeout, event_tx, Handle::current());
    let mut ui_event_rx = controller.subscribe();

    let engine = Arc::new(InterceptionEngine::new(
        controller.clone(),
        platform::authorizer(),
        platform::backend(),
    ));

    if !engine.check_authorization() {
        warn!("input monitoring is not authorized - prompting");
        engine.request_authorization();
    }

    // Start interception (tap runs on its own thread)
    let starter = Arc::clone(&engine);
    match tokio::task::spawn_blocking(move || starter.start()).await? {
        Ok(()) => {
            info!("interception engine started");
        }
        Err(e) => {
            error!(%e, "failed to start interception engine");
            warn!("continuing without interception - retry over IPC once authorized");
        }
    }

    let server = Server::new(&config.socket_path, controller.clone(), Arc::clone(&engine))?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Deliver lock state changes to the UI side
        _ = async {
            loop {
                match ui_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, locked = event.locked(), "lock state changed");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "lock event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("lock event handler exited");
        }

        // Wait for shutdown signal
        cause = shutdown.wait() => {
            info!(%cause, "shutdown signal received");
        }
    }

    // Cleanup: the engine forces an unlock before releasing the tap
    info!("shutting down...");

    let stopper = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopper.stop()).await?;
    server.shutdown().await;

    info!("inputlock-daemon stopped");

    Ok(())
}
