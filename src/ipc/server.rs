//! Unix domain socket server for IPC
//!
//! Provides request-response communication, forwards control requests to
//! the controller, and pushes controller events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::state::{ControlRequest, ControllerStatus};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    control_tx: mpsc::Sender<ControlRequest>,
    event_tx: broadcast::Sender<StateEvent>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// What a client connection woke up for
enum Incoming {
    Frame(Option<Vec<u8>>),
    Event(std::result::Result<StateEvent, broadcast::error::RecvError>),
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        control_tx: mpsc::Sender<ControlRequest>,
        event_tx: broadcast::Sender<StateEvent>,
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

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            control_tx,
            event_tx,
        })
    }

    /// Record the latest controller snapshot
    pub async fn set_status(&self, status: ControllerStatus) {
        let mut server_state = self.state.write().await;
        server_state.status.controller = Some(status);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let control_tx = self.control_tx.clone();
                    let event_tx = self.event_tx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, control_tx, event_tx) => {
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
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        control_tx: mpsc::Sender<ControlRequest>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let reader_task = tokio::spawn(Self::read_frames(reader, frame_tx));
        let mut subscription: Option<broadcast::Receiver<StateEvent>> = None;

        let result = loop {
            let incoming = tokio::select! {
                frame = frame_rx.recv() => Incoming::Frame(frame),
                event = Self::next_event(&mut subscription) => Incoming::Event(event),
            };

            match incoming {
                Incoming::Frame(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Incoming::Frame(Some(frame)) => {
                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) =
                                Self::process_request(request, &state, &control_tx).await;
                            if subscribe && subscription.is_none() {
                                subscription = Some(event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(e) => Response::Error {
                            code: "bad_request".to_string(),
                            message: e.to_string(),
                        },
                    };
                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                Incoming::Event(Ok(event)) => {
                    let notification = Notification::Event { event };
                    if let Err(e) = Self::send_message(&mut writer, &notification).await {
                        break Err(e);
                    }
                }
                Incoming::Event(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Incoming::Event(Err(broadcast::error::RecvError::Closed)) => {
                    subscription = None;
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed frames until EOF or a protocol violation
    async fn read_frames(mut reader: OwnedReadHalf, frames: mpsc::Sender<Vec<u8>>) {
        let mut len_buf = [0u8; 4];
        loop {
            // Read message length (4-byte little-endian)
            if let Err(e) = reader.read_exact(&mut len_buf).await {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!(?e, "client read error");
                }
                return;
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return;
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                warn!(?e, "client read error");
                return;
            }
            if frames.send(msg_buf).await.is_err() {
                return;
            }
        }
    }

    async fn next_event(
        subscription: &mut Option<broadcast::Receiver<StateEvent>>,
    ) -> std::result::Result<StateEvent, broadcast::error::RecvError> {
        match subscription {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        control_tx: &mpsc::Sender<ControlRequest>,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Subscribe => (Response::Subscribed, true),

            control => {
                let Some(control) = control.into_control() else {
                    return (
                        Response::Error {
                            code: "unsupported".to_string(),
                            message: "request not supported".to_string(),
                        },
                        false,
                    );
                };
                info!(?control, "control request via IPC");
                match control_tx.send(control).await {
                    Ok(()) => (Response::Ack, false),
                    Err(_) => (
                        Response::Error {
                            code: "unavailable".to_string(),
                            message: "controller is not running".to_string(),
                        },
                        false,
                    ),
                }
            }
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
