use std::collections::{HashMap, VecDeque};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use web_cmn::{FrameMetadata, ServerEvent, parse_client_message};

use crate::error::{Result, ServerError};

/// Port not known yet and the caller asked not to wait.
pub const RESOLVED_PORT_UNRESOLVED: i32 = -1;
/// Server start requested but the port is not bound yet.
pub const RESOLVED_PORT_PENDING: i32 = -2;

pub const RING_BUFFER_SIZE: usize = 60;
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1";

const SEND_INTERVAL: Duration = Duration::from_millis(5);
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address; empty means loopback.
    pub address: String,
    pub port: u16,
    pub max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: 8080,
            max_attempts: 32,
        }
    }
}

/// Binds the first free port in `[port, port + max_attempts)`.
pub fn bind_with_retry(address: &str, port: u16, max_attempts: u32) -> Result<StdTcpListener> {
    let address = if address.is_empty() { DEFAULT_SERVER_ADDRESS } else { address };
    let attempts = max_attempts.clamp(1, u16::MAX as u32);

    for attempt in 0..attempts {
        let Some(candidate) = port.checked_add(attempt as u16) else {
            break;
        };
        match StdTcpListener::bind((address, candidate)) {
            Ok(listener) => {
                info!("Server created on port({candidate})");
                return Ok(listener);
            }
            Err(err) => debug!("Error starting server on port {candidate} - {err}"),
        }
    }

    error!("Server create failed after {attempts} attempts");
    Err(ServerError::Bind {
        address: address.to_string(),
        port,
        attempts,
    })
}

#[derive(Debug, Clone)]
struct FrameSlot {
    metadata: FrameMetadata,
    data: Bytes,
}

/// Frame ring and input queue shared between the render thread and client sessions.
#[derive(Debug)]
struct StreamState {
    ring: Vec<Option<FrameSlot>>,
    write_idx: usize,
    frame_id_counter: u64,
    // client id -> next ring index to send
    clients: HashMap<u64, usize>,
    next_client_id: u64,
    events: VecDeque<ServerEvent>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            ring: vec![None; RING_BUFFER_SIZE],
            write_idx: 0,
            frame_id_counter: 0,
            clients: HashMap::new(),
            next_client_id: 0,
            events: VecDeque::new(),
        }
    }

    fn connect(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(id, self.write_idx);
        id
    }

    fn disconnect(&mut self, client: u64) {
        self.clients.remove(&client);
    }

    fn push_frame(&mut self, data: &[u8], width: u32, height: u32) -> u64 {
        let frame_id = self.frame_id_counter;
        self.ring[self.write_idx] = Some(FrameSlot {
            metadata: FrameMetadata { frame_id, width, height },
            data: Bytes::copy_from_slice(data),
        });
        self.write_idx = (self.write_idx + 1) % RING_BUFFER_SIZE;
        self.frame_id_counter += 1;
        frame_id
    }

    fn pending_frames(&mut self, client: u64) -> Vec<FrameSlot> {
        let write_idx = self.write_idx;
        let Some(read_idx) = self.clients.get_mut(&client) else {
            return Vec::new();
        };
        let mut frames = Vec::new();
        while *read_idx != write_idx {
            if let Some(slot) = &self.ring[*read_idx] {
                frames.push(slot.clone());
            }
            *read_idx = (*read_idx + 1) % RING_BUFFER_SIZE;
        }
        frames
    }

    fn latest_frame(&self) -> Option<&FrameSlot> {
        if self.frame_id_counter == 0 {
            return None;
        }
        self.ring[(self.write_idx + RING_BUFFER_SIZE - 1) % RING_BUFFER_SIZE].as_ref()
    }

    fn pop_event(&mut self) -> Option<ServerEvent> {
        if self.events.is_empty() && self.clients.is_empty() {
            return Some(ServerEvent::Inactive);
        }
        self.events.pop_front()
    }
}

#[derive(Clone)]
struct ServerState {
    stream: Arc<Mutex<StreamState>>,
    shutdown: watch::Receiver<bool>,
}

impl ServerState {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// HTTP + websocket server streaming encoded frames to browser clients.
///
/// Runs on its own tokio runtime thread. Dropping the server stops it.
pub struct StreamServer {
    stream: Arc<Mutex<StreamState>>,
    port: u16,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamServer {
    pub fn start(config: &ServerConfig) -> Result<Self> {
        let listener = bind_with_retry(&config.address, config.port, config.max_attempts)?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stream-server-io")
            .enable_all()
            .build()?;

        let stream = Arc::new(Mutex::new(StreamState::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = ServerState {
            stream: stream.clone(),
            shutdown: shutdown_rx.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("stream-server".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!("Failed to register server socket: {err}");
                            return;
                        }
                    };
                    let app = router(state);
                    if let Err(err) = axum::serve(listener, app)
                        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
                        .await
                    {
                        error!("Stream server stopped: {err}");
                    }
                });
            })?;

        Ok(Self {
            stream,
            port,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Queues one encoded frame for every connected client and returns its frame id.
    pub fn push_h264(&self, data: &[u8], width: u32, height: u32) -> u64 {
        self.lock().push_frame(data, width, height)
    }

    /// Next queued input event, `Inactive` when idle with nobody connected.
    pub fn pop_event(&self) -> Option<ServerEvent> {
        self.lock().pop_event()
    }

    /// Blocks until a client connects or `external_active_count` reports activity.
    pub fn wait_until_active(&self, external_active_count: &dyn Fn() -> i32) {
        debug!("Server stream going inactive.");
        loop {
            if self.client_count() > 0 || external_active_count() != 0 {
                break;
            }
            std::thread::sleep(ACTIVE_POLL_INTERVAL);
        }
        debug!("Server stream going active.");
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Stream server thread panicked");
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(websocket))
        .route("/frame", get(latest_frame))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn latest_frame(State(state): State<ServerState>) -> Response {
    let latest = state.lock().latest_frame().cloned();
    match latest {
        Some(slot) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            slot.data,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: ServerState) {
    let client = state.lock().connect();
    info!("Stream client {client} connected");

    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();
    let mut ticker = tokio::time::interval(SEND_INTERVAL);

    loop {
        let keep_going = tokio::select! {
            _ = ticker.tick() => {
                let frames = state.lock().pending_frames(client);
                let mut sent = true;
                for frame in frames {
                    let text = Message::Text(frame.metadata.to_message().into());
                    if sender.send(text).await.is_err() || sender.send(Message::Binary(frame.data)).await.is_err() {
                        sent = false;
                        break;
                    }
                }
                sent
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match parse_client_message(text.as_str()) {
                        Ok(Some(event)) => state.lock().events.push_back(event),
                        Ok(None) => {}
                        Err(err) => warn!("Dropping client message: {err}"),
                    }
                    true
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
            _ = shutdown.changed() => false,
        };
        if !keep_going {
            break;
        }
    }

    state.lock().disconnect(client);
    info!("Stream client {client} disconnected");
}
