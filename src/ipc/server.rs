//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! lock state changes to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{ChangeReason, LockEvent};
use crate::hotkey::{EngineError, InterceptionEngine};
use crate::state::LockController;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What request handlers can reach
struct ServerContext {
    controller: LockController,
    engine: Arc<InterceptionEngine>,
    start_time: Instant,
}

impl ServerContext {
    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            locked: self.controller.is_locked(),
            intercepting: self.engine.is_active(),
            authorized: self.engine.check_authorization(),
            lock_timeout_secs: self.controller.timeout().as_secs(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ..DaemonStatus::default()
        }
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        controller: LockController,
        engine: Arc<InterceptionEngine>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ServerContext {
                controller,
                engine,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(8);
        // Reading stays in its own task so that a pending read is never
        // cancelled halfway through a frame by a notification.
        let _reader = AbortOnDrop(tokio::spawn(Self::read_requests(reader, request_tx)));

        let mut events: Option<broadcast::Receiver<LockEvent>> = None;

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let response = match request {
                        None => {
                            debug!("client disconnected");
                            return Ok(());
                        }
                        Some(Ok(request)) => {
                            debug!(?request, "received request");
                            if matches!(request, Request::Subscribe) && events.is_none() {
                                events = Some(context.controller.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            Self::process_request(request, &context).await
                        }
                        Some(Err(message)) => Response::error("bad_request", message),
                    };
                    Self::send_message(&mut writer, &response).await?;
                }
                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            let notification = Notification::LockEvent { event };
                            Self::send_message(&mut writer, &notification).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        }
    }

    /// Read length-prefixed requests until EOF or the handler goes away.
    /// Unparsable bodies are forwarded as errors so the client gets a reply.
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<Result<Request, String>>,
    ) {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            if let Err(e) = reader.read_exact(&mut len_buf).await {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!(?e, "failed to read from client");
                }
                return;
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return;
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                warn!(?e, "failed to read message body");
                return;
            }

            let request = serde_json::from_slice::<Request>(&msg_buf)
                .map_err(|e| format!("failed to parse request: {}", e));

            if request_tx.send(request).await.is_err() {
                return;
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(
        writer: &mut OwnedWriteHalf,
        msg: &T,
    ) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &Arc<ServerContext>) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(context.status()),

            Request::Toggle => {
                let controller = &context.controller;
                if !controller.is_locked() && !controller.is_intercepting() {
                    return Response::error("not_intercepting", "interception is not active");
                }
                let locked = controller.toggle();
                info!(locked, "lock toggled via IPC");
                Response::LockState { locked }
            }

            Request::ForceUnlock => {
                context.controller.force_unlock(ChangeReason::Request);
                Response::LockState { locked: false }
            }

            Request::RequestAuthorization => {
                let engine = Arc::clone(&context.engine);
                match tokio::task::spawn_blocking(move || engine.request_authorization()).await {
                    Ok(()) => Response::AuthorizationRequested,
                    Err(e) => Response::error("internal", e.to_string()),
                }
            }

            Request::StartInterception => {
                let engine = Arc::clone(&context.engine);
                match tokio::task::spawn_blocking(move || engine.start()).await {
                    Ok(Ok(())) => Response::InterceptionStarted,
                    Ok(Err(e @ EngineError::Authorization)) => {
                        Response::error("not_authorized", e.to_string())
                    }
                    Ok(Err(e)) => Response::error("tap_failed", e.to_string()),
                    Err(e) => Response::error("internal", e.to_string()),
                }
            }

            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Aborts the wrapped task when the owning handler returns or is cancelled
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Next notification for a subscribed client; never resolves otherwise.
async fn next_event(
    events: &mut Option<broadcast::Receiver<LockEvent>>,
) -> Result<LockEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::mock::{MockAuthorizer, MockBackend};
    use crate::state::DEFAULT_LOCK_TIMEOUT;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::runtime::Handle;

    struct Fixture {
        server: Arc<Server>,
        engine: Arc<InterceptionEngine>,
        authorizer: Arc<MockAuthorizer>,
        socket_path: PathBuf,
    }

    fn create_fixture(name: &str) -> Fixture {
        let socket_path = std::env::temp_dir().join(format!(
            "inputlock-ipc-{}-{}.sock",
            name,
            std::process::id()
        ));
        let (tx, _rx) = broadcast::channel(64);
        let controller = LockController::new(DEFAULT_LOCK_TIMEOUT, tx, Handle::current());
        let authorizer = Arc::new(MockAuthorizer::new(true));
        let engine = Arc::new(InterceptionEngine::new(
            controller.clone(),
            authorizer.clone(),
            Arc::new(MockBackend::new()),
        ));
        let server = Arc::new(Server::new(&socket_path, controller, Arc::clone(&engine)).unwrap());

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        Fixture {
            server,
            engine,
            authorizer,
            socket_path,
        }
    }

    async fn write_frame(stream: &mut UnixStream, body: &[u8]) {
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn request(stream: &mut UnixStream, value: Value) -> Value {
        write_frame(stream, &serde_json::to_vec(&value).unwrap()).await;
        read_frame(stream).await
    }

    async fn read_frame(stream: &mut UnixStream) -> Value {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fx = create_fixture("status");
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let pong = request(&mut client, json!({"type": "ping"})).await;
        assert_eq!(pong["type"], "pong");

        let status = request(&mut client, json!({"type": "get_status"})).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["locked"], false);
        assert_eq!(status["intercepting"], false);
        assert_eq!(status["authorized"], true);
        assert_eq!(status["lock_timeout_secs"], 600);

        fx.server.shutdown().await;
        assert!(!fx.socket_path.exists());
    }

    #[tokio::test]
    async fn test_toggle_needs_interception() {
        let fx = create_fixture("toggle");
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let refused = request(&mut client, json!({"type": "toggle"})).await;
        assert_eq!(refused["type"], "error");
        assert_eq!(refused["code"], "not_intercepting");

        let started = request(&mut client, json!({"type": "start_interception"})).await;
        assert_eq!(started["type"], "interception_started");

        let toggled = request(&mut client, json!({"type": "toggle"})).await;
        assert_eq!(toggled, json!({"type": "lock_state", "locked": true}));

        fx.engine.stop();
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_without_authorization() {
        let fx = create_fixture("unauthorized");
        fx.authorizer.set_authorized(false);
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let refused = request(&mut client, json!({"type": "start_interception"})).await;
        assert_eq!(refused["code"], "not_authorized");

        let prompted = request(&mut client, json!({"type": "request_authorization"})).await;
        assert_eq!(prompted["type"], "authorization_requested");
        assert_eq!(fx.authorizer.prompts(), 1);

        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_lock_events() {
        let fx = create_fixture("subscribe");
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();
        request(&mut client, json!({"type": "start_interception"})).await;

        let subscribed = request(&mut client, json!({"type": "subscribe"})).await;
        assert_eq!(subscribed["type"], "subscribed");

        let toggled = request(&mut client, json!({"type": "toggle"})).await;
        assert_eq!(toggled["locked"], true);
        let pushed = read_frame(&mut client).await;
        assert_eq!(pushed["type"], "lock_event");
        assert_eq!(pushed["event"]["locked"], true);
        assert_eq!(pushed["event"]["reason"], "toggle");

        let unlocked = request(&mut client, json!({"type": "force_unlock"})).await;
        assert_eq!(unlocked["locked"], false);
        let pushed = read_frame(&mut client).await;
        assert_eq!(pushed["event"]["reason"], "request");

        fx.engine.stop();
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let fx = create_fixture("malformed");
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        write_frame(&mut client, b"{\"type\":\"launch_rockets\"}").await;
        let reply = read_frame(&mut client).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "bad_request");

        // The connection stays usable.
        let pong = request(&mut client, json!({"type": "ping"})).await;
        assert_eq!(pong["type"], "pong");

        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_message_closes_connection() {
        let fx = create_fixture("oversized");
        let mut client = UnixStream::connect(&fx.socket_path).await.unwrap();

        let len = (MAX_MESSAGE_LEN + 1) as u32;
        client.write_all(&len.to_le_bytes()).await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("connection was not closed")
            .unwrap();
        assert_eq!(read, 0);

        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_reader_task_is_aborted_with_its_handler() {
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        let guard = AbortOnDrop(tokio::spawn(async move {
            let _held = held_tx;
            std::future::pending::<()>().await;
        }));

        drop(guard);

        // The sender only drops once the task is torn down.
        let result = tokio::time::timeout(Duration::from_secs(5), held_rx)
            .await
            .expect("task outlived its guard");
        assert!(result.is_err());
    }
}
