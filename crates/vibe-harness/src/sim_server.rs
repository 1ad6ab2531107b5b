//! Simulation server wrapper for testing with turmoil.
//!
//! `SimServer` wraps `ServerDriver` for integration with turmoil's
//! deterministic simulation. It uses [`SimEnv`] with the memory stores for
//! the action-based core and turmoil TCP for networking.

use std::{collections::HashMap, io, time::Duration};

use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
};
use turmoil::net::{TcpListener, TcpStream};
use vibe_proto::Frame;
use vibe_server::{
    DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent,
    auth::TokenAuthenticator,
    stores::{MemoryMessageStore, MemorySocialGraph},
};

use crate::{SimEnv, wire};

/// Driver type used throughout the simulation.
pub type SimDriver =
    ServerDriver<SimEnv, TokenAuthenticator, MemorySocialGraph, MemoryMessageStore>;

/// Tick period for the autonomous run loop.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Events funneled from per-connection reader tasks to the run loop.
enum ConnEvent {
    Frame { session_id: u64, frame: Frame },
    Closed { session_id: u64, reason: String },
}

/// Simulation server for testing with turmoil.
///
/// Wraps `ServerDriver` and handles the async I/O layer using turmoil's
/// deterministic TCP implementation. [`SimServer::run`] drives the server
/// autonomously inside a turmoil host; the accessors exist for tests that
/// drive events by hand instead.
pub struct SimServer {
    /// The action-based server driver
    driver: SimDriver,
    /// TCP listener for accepting connections
    listener: TcpListener,
    /// Write halves per session
    writers: HashMap<u64, WriteHalf<TcpStream>>,
    /// Reader-task event funnel
    events_tx: mpsc::Sender<ConnEvent>,
    events_rx: mpsc::Receiver<ConnEvent>,
    /// Next session ID
    next_session_id: u64,
}

impl SimServer {
    /// Create and bind a new simulation server with permissive auth.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Self::bind_with_config(address, DriverConfig::default()).await
    }

    /// Create and bind a new simulation server with custom config.
    pub async fn bind_with_config(address: &str, config: DriverConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let driver = ServerDriver::new(
            SimEnv::new(),
            TokenAuthenticator::permissive(),
            MemorySocialGraph::new(),
            MemoryMessageStore::new(),
            config,
        );

        let (events_tx, events_rx) = mpsc::channel(64);

        Ok(Self {
            driver,
            listener,
            writers: HashMap::new(),
            events_tx,
            events_rx,
            next_session_id: 1,
        })
    }

    /// Underlying driver for test assertions.
    pub fn driver(&self) -> &SimDriver {
        &self.driver
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.driver.connection_count()
    }

    /// Run the server until the simulation tears the host down.
    ///
    /// Accepts connections, reads frames off them in background tasks, and
    /// feeds everything through the driver.
    pub async fn run(mut self) -> io::Result<()> {
        let mut ticker = tokio::time::interval(TICK_PERIOD);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted?;
                    self.accept_stream(stream).await?;
                },

                event = self.events_rx.recv() => {
                    // Senders never all drop while self holds events_tx.
                    let Some(event) = event else { return Ok(()) };
                    self.handle_conn_event(event).await?;
                },

                _ = ticker.tick() => {
                    let actions = self
                        .driver
                        .process_event(ServerEvent::Tick)
                        .map_err(|e| io::Error::other(e.to_string()))?;
                    self.execute_actions(actions).await;
                },
            }
        }
    }

    async fn accept_stream(&mut self, stream: TcpStream) -> io::Result<()> {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let (reader, writer) = tokio::io::split(stream);
        self.writers.insert(session_id, writer);

        let actions = self
            .driver
            .process_event(ServerEvent::ConnectionAccepted { session_id })
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.execute_actions(actions).await;

        tokio::spawn(read_frames(reader, session_id, self.events_tx.clone()));

        Ok(())
    }

    async fn handle_conn_event(&mut self, event: ConnEvent) -> io::Result<()> {
        let actions = match event {
            ConnEvent::Frame { session_id, frame } => {
                self.driver.process_event(ServerEvent::FrameReceived { session_id, frame })
            },
            ConnEvent::Closed { session_id, reason } => {
                self.writers.remove(&session_id);
                self.driver.process_event(ServerEvent::ConnectionClosed { session_id, reason })
            },
        }
        .map_err(|e| io::Error::other(e.to_string()))?;

        self.execute_actions(actions).await;
        Ok(())
    }

    /// Execute server actions.
    ///
    /// Write failures are contained per session: the dead writer is dropped
    /// and the loop keeps serving everyone else.
    async fn execute_actions(&mut self, actions: Vec<ServerAction<tokio::time::Instant>>) {
        for action in actions {
            match action {
                ServerAction::SendToSession { session_id, frame } => {
                    self.send_frame(session_id, &frame).await;
                },

                ServerAction::Broadcast { frame } => {
                    for session_id in self.driver.registered_sessions() {
                        self.send_frame(session_id, &frame).await;
                    }
                },

                ServerAction::CloseConnection { session_id, reason } => {
                    self.close_connection(session_id, &reason);
                },

                ServerAction::Log { level, message, .. } => {
                    log(level, &message);
                },
            }
        }
    }

    /// Send a frame to a specific session.
    ///
    /// The reader task reports the disconnect separately, so a failed write
    /// only discards the writer here.
    async fn send_frame(&mut self, session_id: u64, frame: &Frame) {
        let Some(writer) = self.writers.get_mut(&session_id) else { return };
        if let Err(e) = wire::write_frame(writer, frame).await {
            tracing::debug!("write to session {session_id} failed: {e}");
            self.writers.remove(&session_id);
        }
    }

    /// Close a connection.
    fn close_connection(&mut self, session_id: u64, reason: &str) {
        if let Some(mut writer) = self.writers.remove(&session_id) {
            tokio::spawn(async move {
                let _ = writer.shutdown().await;
            });
        }

        let _ = self.driver.process_event(ServerEvent::ConnectionClosed {
            session_id,
            reason: reason.to_string(),
        });
    }
}

/// Read frames off a connection and funnel them to the run loop.
async fn read_frames(
    mut reader: ReadHalf<TcpStream>,
    session_id: u64,
    tx: mpsc::Sender<ConnEvent>,
) {
    loop {
        match wire::read_frame(&mut reader).await {
            Ok(frame) => {
                if tx.send(ConnEvent::Frame { session_id, frame }).await.is_err() {
                    return;
                }
            },
            Err(e) => {
                let _ = tx
                    .send(ConnEvent::Closed { session_id, reason: e.to_string() })
                    .await;
                return;
            },
        }
    }
}

/// Log a message.
fn log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }
}
