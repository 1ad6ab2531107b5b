//! Vibe production server.
//!
//! Production server for the presence and notification layer, using Quinn for
//! QUIC transport, Tokio for the async runtime, and system time with
//! cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps [`vibe_core`]'s
//! action-based session logic with real I/O. The [`ServerDriver`] follows the
//! Sans-IO pattern (see [`vibe_core`] for details), while [`Server`] executes
//! the actions using Quinn QUIC and the Tokio runtime.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: Production runtime that executes `ServerDriver` actions
//! - [`QuinnTransport`]: QUIC transport via Quinn
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)
//! - [`stores`]: Social graph and message backends (memory, redb, chaotic)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod driver;
mod error;
mod presence;
mod registry;
mod router;
pub mod stores;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc};

use bytes::BytesMut;
pub use driver::{LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use presence::PresenceTracker;
pub use registry::{ConnectionRegistry, PresenceTransition};
pub use router::{EventRouter, RouteOutcome};
pub use stores::{MessageStore, SocialGraphStore};
pub use system_env::SystemEnv;
pub use transport::{QuinnConnection, QuinnTransport};

use auth::Authenticator;
use tokio::sync::{RwLock, mpsc};
use vibe_core::Environment;
use vibe_proto::{Frame, FrameHeader};

/// Encoded frames buffered per session before a stalled peer is cut off.
const PUSH_QUEUE_DEPTH: usize = 256;

/// Per-session I/O handles, shared by every connection task.
///
/// Each session gets one outbound uni-stream at accept time, drained by its
/// own writer task off a bounded queue. The single stream keeps
/// per-recipient delivery ordered; the queue keeps a peer with a full
/// flow-control window from stalling anyone else.
struct ConnectionTable {
    by_session: RwLock<HashMap<u64, QuinnConnection>>,
    push_queues: RwLock<HashMap<u64, mpsc::Sender<Vec<u8>>>>,
}

impl ConnectionTable {
    fn new() -> Self {
        Self { by_session: RwLock::new(HashMap::new()), push_queues: RwLock::new(HashMap::new()) }
    }

    async fn insert(&self, session_id: u64, conn: QuinnConnection, push: quinn::SendStream) {
        let (tx, rx) = mpsc::channel(PUSH_QUEUE_DEPTH);
        self.by_session.write().await.insert(session_id, conn);
        self.register_queue(session_id, tx).await;
        tokio::spawn(drain_push_queue(session_id, push, rx));
    }

    async fn register_queue(&self, session_id: u64, tx: mpsc::Sender<Vec<u8>>) {
        self.push_queues.write().await.insert(session_id, tx);
    }

    async fn remove(&self, session_id: u64) {
        self.by_session.write().await.remove(&session_id);
        self.push_queues.write().await.remove(&session_id);
    }

    async fn close(&self, session_id: u64, reason: &[u8]) {
        self.push_queues.write().await.remove(&session_id);
        if let Some(conn) = self.by_session.write().await.remove(&session_id) {
            conn.close(0u32.into(), reason);
        }
    }
}

/// Writer task: pull encoded frames off a session's queue onto its stream.
async fn drain_push_queue(
    session_id: u64,
    mut stream: quinn::SendStream,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(buf) = rx.recv().await {
        if let Err(e) = stream.write_all(&buf).await {
            tracing::warn!("push to session {session_id} failed: {e}");
            break;
        }
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Driver configuration (timeouts, limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            driver: DriverConfig::default(),
        }
    }
}

type Driver<A, G, M> = ServerDriver<SystemEnv, A, G, M>;
type SharedDriver<A, G, M> = Arc<tokio::sync::Mutex<Driver<A, G, M>>>;

/// Production Vibe server.
///
/// Wraps `ServerDriver` with Quinn QUIC transport and the system environment.
/// Generic over the authenticator and store backends so the binary can pick
/// memory or redb persistence at startup.
pub struct Server<A, G, M>
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    driver: Driver<A, G, M>,
    transport: QuinnTransport,
    env: SystemEnv,
}

impl<A, G, M> Server<A, G, M>
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` or `ServerError::Transport` when the endpoint
    ///   cannot be set up
    pub fn bind(
        config: ServerRuntimeConfig,
        auth: A,
        graph: G,
        messages: M,
    ) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), auth, graph, messages, config.driver);
        let transport =
            QuinnTransport::bind(&config.bind_address, config.cert_path, config.key_path)?;

        Ok(Self { driver, transport, env })
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// Runs until the endpoint closes or an error occurs. A background task
    /// drives the driver's tick event once per second for heartbeats and
    /// idle timeouts.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` when the endpoint fails
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server up on {}", self.transport.local_addr()?);

        let env = self.env;
        let driver: SharedDriver<A, G, M> = Arc::new(tokio::sync::Mutex::new(self.driver));
        let table = Arc::new(ConnectionTable::new());

        spawn_ticker(Arc::clone(&driver), Arc::clone(&table), env.clone());

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let driver = Arc::clone(&driver);
                    let table = Arc::clone(&table);
                    let env = env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(conn, driver, table, env).await {
                            tracing::error!("connection task failed: {e}");
                        }
                    });
                },
                Err(e) => tracing::error!("accept failed: {e}"),
            }
        }
    }

    /// Local address the server is bound to.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the socket address cannot be read
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }
}

/// Feed `ServerEvent::Tick` into the driver once per second.
fn spawn_ticker<A, G, M>(driver: SharedDriver<A, G, M>, table: Arc<ConnectionTable>, env: SystemEnv)
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    tokio::spawn(async move {
        loop {
            env.sleep(std::time::Duration::from_secs(1)).await;

            let mut guard = driver.lock().await;
            let actions = match guard.process_event(ServerEvent::Tick) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::warn!("tick rejected: {e}");
                    continue;
                },
            };
            if let Err(e) = execute_actions(&mut guard, actions, &table).await {
                tracing::warn!("tick action failed: {e}");
            }
        }
    });
}

/// Own one QUIC connection: register it, pump its request streams, tear it
/// down when the peer goes away.
async fn serve_connection<A, G, M>(
    conn: QuinnConnection,
    driver: SharedDriver<A, G, M>,
    table: Arc<ConnectionTable>,
    env: SystemEnv,
) -> Result<(), ServerError>
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    let session_id = env.random_u64();

    tracing::debug!("session {} connected from {}", session_id, conn.remote_addr());

    let push = conn
        .open_uni()
        .await
        .map_err(|e| ServerError::Internal(format!("push stream for {session_id}: {e}")))?;

    table.insert(session_id, conn.clone(), push).await;

    {
        let mut guard = driver.lock().await;
        let actions = guard.process_event(ServerEvent::ConnectionAccepted { session_id })?;
        execute_actions(&mut guard, actions, &table).await?;
    }

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let driver = Arc::clone(&driver);
                let table = Arc::clone(&table);

                tokio::spawn(async move {
                    if let Err(e) =
                        serve_request_stream(session_id, send, recv, driver, &table).await
                    {
                        tracing::debug!("request stream for {session_id}: {e}");
                    }
                });
            },
            Err(e) => {
                tracing::debug!("session {session_id} gone: {e}");
                break;
            },
        }
    }

    table.remove(session_id).await;

    let mut guard = driver.lock().await;
    let actions = guard.process_event(ServerEvent::ConnectionClosed {
        session_id,
        reason: "connection closed".to_string(),
    })?;
    execute_actions(&mut guard, actions, &table).await?;

    Ok(())
}

/// Read frames off one client-initiated bi-stream and feed them through the
/// driver. Replies travel over the push stream, never this one.
async fn serve_request_stream<A, G, M>(
    session_id: u64,
    send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    driver: SharedDriver<A, G, M>,
    table: &Arc<ConnectionTable>,
) -> Result<(), ServerError>
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    drop(send);

    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);
        if recv.read_exact(&mut buf[..FrameHeader::SIZE]).await.is_err() {
            break;
        }

        let payload_size = match FrameHeader::from_bytes(&buf[..FrameHeader::SIZE]) {
            Ok(header) => header.payload_size() as usize,
            Err(e) => {
                tracing::warn!("session {session_id} sent a bad header: {e}");
                break;
            },
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            if recv.read_exact(&mut buf[FrameHeader::SIZE..]).await.is_err() {
                break;
            }
        }

        let frame = match Frame::decode(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("session {session_id} sent an undecodable frame: {e}");
                break;
            },
        };

        let mut guard = driver.lock().await;
        match guard.process_event(ServerEvent::FrameReceived { session_id, frame }) {
            Ok(actions) => execute_actions(&mut guard, actions, table).await?,
            Err(e) => tracing::warn!("frame from session {session_id} rejected: {e}"),
        }
    }

    Ok(())
}

/// Run driver actions against the live connection table.
///
/// Sends only enqueue onto per-session queues, so this never waits on peer
/// flow control; a dead or stalled peer is contained to its own session.
async fn execute_actions<A, G, M>(
    driver: &mut Driver<A, G, M>,
    actions: Vec<ServerAction>,
    table: &ConnectionTable,
) -> Result<(), ServerError>
where
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                let buf = encode_frame(&frame)?;
                push_to_session(table, session_id, &buf).await;
            },

            ServerAction::Broadcast { frame } => {
                let buf = encode_frame(&frame)?;
                for session_id in driver.registered_sessions() {
                    push_to_session(table, session_id, &buf).await;
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!("closing session {session_id}: {reason}");
                table.close(session_id, reason.as_bytes()).await;
            },

            ServerAction::Log { level, message, .. } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }

    Ok(())
}

fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ServerError> {
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + frame.payload.len());
    frame.encode(&mut buf).map_err(|e| ServerError::Protocol(e.to_string()))?;
    Ok(buf)
}

/// Enqueue encoded bytes for a session's writer task.
///
/// A full queue means the peer has not drained pushes for a while; the
/// connection is cut rather than letting its backlog grow or block the
/// caller.
async fn push_to_session(table: &ConnectionTable, session_id: u64, buf: &[u8]) {
    let queues = table.push_queues.read().await;
    let Some(tx) = queues.get(&session_id) else {
        tracing::warn!("push to unknown session {session_id} dropped");
        return;
    };

    match tx.try_send(buf.to_vec()) {
        Ok(()) => {},
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("push queue for session {session_id} full, closing the connection");
            drop(queues);
            table.close(session_id, b"slow consumer").await;
        },
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("push queue for session {session_id} already torn down");
        },
    }
}
