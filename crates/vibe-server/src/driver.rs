//! Server driver.
//!
//! Ties together session state machines, the ConnectionRegistry (identity to
//! live connections), the PresenceTracker (derived online set), the
//! EventRouter (targeted notification fan-out), and the social/message
//! stores. Pure state machine: events in, actions out, no I/O.

use std::collections::HashMap;

use vibe_core::{Environment, Session, SessionAction, SessionConfig};
use vibe_proto::{
    Frame, FrameHeader, Opcode, Payload, UserId,
    payloads::{
        ErrorPayload,
        presence::{Notification, NotificationKind, PresenceUpdate},
        social::{FollowToggleReply, MessageAck},
    },
};

use crate::{
    auth::Authenticator,
    error::ServerError,
    presence::PresenceTracker,
    registry::ConnectionRegistry,
    router::{EventRouter, RouteOutcome},
    stores::{MessageStore, SocialGraphStore, StoreError},
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Session configuration (timeouts, heartbeat interval)
    pub session: SessionConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { session: SessionConfig::default(), max_connections: 10_000 }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique session ID assigned by the runtime
        session_id: u64,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Session that sent the frame
        session_id: u64,
        /// The received frame
        frame: Frame,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Session that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick for timeout checking
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
/// Generic over the instant type so simulation environments can carry their
/// virtual clock through log timestamps.
#[derive(Debug, Clone)]
pub enum ServerAction<I = std::time::Instant> {
    /// Send a frame to a specific session
    SendToSession {
        /// Target session ID
        session_id: u64,
        /// Frame to send
        frame: Frame,
    },

    /// Broadcast a frame to every registered session
    Broadcast {
        /// Frame to broadcast
        frame: Frame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// Orchestrates session handshakes, presence bookkeeping, notification
/// routing, and follow/message store access.
pub struct ServerDriver<E, A, G, M>
where
    E: Environment,
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    /// Session state machines (session_id → Session)
    sessions: HashMap<u64, Session<E::Instant>>,
    /// Identity to live connections
    pub(crate) registry: ConnectionRegistry,
    /// Derived online set
    presence: PresenceTracker,
    /// Handshake token resolution
    auth: A,
    /// Follow graph backend
    graph: G,
    /// Direct message backend
    messages: M,
    /// Environment (time, RNG)
    env: E,
    /// Server configuration
    config: ServerConfig,
}

impl<E, A, G, M> ServerDriver<E, A, G, M>
where
    E: Environment,
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    /// Create a new server driver.
    pub fn new(env: E, auth: A, graph: G, messages: M, config: ServerConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            registry: ConnectionRegistry::new(),
            presence: PresenceTracker::new(),
            auth,
            graph,
            messages,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    ///
    /// # Errors
    ///
    /// - `ServerError::SessionNotFound` for frames from unknown sessions
    /// - `ServerError::SessionFailed` when a session state machine rejects
    ///   a session-layer frame
    pub fn process_event(
        &mut self,
        event: ServerEvent,
    ) -> Result<Vec<ServerAction<E::Instant>>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, frame)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, &reason)
            },
            ServerEvent::Tick => self.handle_tick(),
        }
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        session_id: u64,
    ) -> Result<Vec<ServerAction<E::Instant>>, ServerError> {
        let now = self.env.now();

        if self.sessions.len() >= self.config.max_connections {
            return Ok(vec![ServerAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }]);
        }

        if self.sessions.contains_key(&session_id) {
            return Err(ServerError::SessionAlreadyExists(session_id));
        }

        self.sessions.insert(session_id, Session::new(now, self.config.session.clone()));

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
            timestamp: now,
        }])
    }

    /// Handle a frame received from a connection.
    fn handle_frame_received(
        &mut self,
        session_id: u64,
        frame: Frame,
    ) -> Result<Vec<ServerAction<E::Instant>>, ServerError> {
        let now = self.env.now();

        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ServerError::SessionNotFound(session_id))?;

        let Some(opcode) = frame.header.opcode_enum() else {
            let mut actions = self.error_response(
                session_id,
                frame.header.request_id(),
                ErrorPayload::frame_rejected(format!(
                    "unknown opcode 0x{:04x}",
                    frame.header.opcode()
                )),
            );
            actions.push(ServerAction::CloseConnection {
                session_id,
                reason: "unknown opcode".to_string(),
            });
            return Ok(actions);
        };

        match opcode {
            Opcode::Hello => Ok(self.handle_hello(session_id, &frame)),

            Opcode::Ping | Opcode::Pong | Opcode::Goodbye | Opcode::Error => {
                // Session-layer frames
                let session_actions = session.handle_frame(&frame, now).map_err(|e| {
                    ServerError::SessionFailed { session_id, reason: e.to_string() }
                })?;

                Ok(session_actions
                    .into_iter()
                    .map(|action| Self::convert_session_action(session_id, action))
                    .collect())
            },

            Opcode::SendMessage => {
                session.update_activity(now);
                Ok(self.handle_send_message(session_id, &frame))
            },

            Opcode::LikePost => {
                session.update_activity(now);
                Ok(self.handle_like_post(session_id, &frame))
            },

            Opcode::FollowToggle => {
                session.update_activity(now);
                Ok(self.handle_follow_toggle(session_id, &frame))
            },

            // Server-to-client frames have no business arriving here
            Opcode::HelloReply
            | Opcode::PresenceUpdate
            | Opcode::Notification
            | Opcode::MessageAck
            | Opcode::FollowToggleReply => Ok(self.error_response(
                session_id,
                frame.header.request_id(),
                ErrorPayload::frame_rejected(format!("{opcode:?} is server-to-client only")),
            )),
        }
    }

    /// Handle a Hello frame: authenticate, register, broadcast presence.
    fn handle_hello(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();
        let request_id = frame.header.request_id();

        let hello = match Payload::from_frame(frame) {
            Ok(Payload::Hello(hello)) => hello,
            Ok(_) => {
                let mut actions = self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload("expected Hello payload"),
                );
                actions.push(ServerAction::CloseConnection {
                    session_id,
                    reason: "malformed Hello".to_string(),
                });
                return actions;
            },
            Err(e) => {
                let mut actions = self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload(format!("failed to decode Hello: {e}")),
                );
                actions.push(ServerAction::CloseConnection {
                    session_id,
                    reason: "malformed Hello".to_string(),
                });
                return actions;
            },
        };

        if hello.version != FrameHeader::VERSION {
            let mut actions = self.error_response(
                session_id,
                request_id,
                ErrorPayload::frame_rejected(format!(
                    "unsupported protocol version {}",
                    hello.version
                )),
            );
            actions.push(ServerAction::CloseConnection {
                session_id,
                reason: "unsupported version".to_string(),
            });
            return actions;
        }

        let user = match self.auth.authenticate(&hello.auth_token) {
            Ok(user) => user,
            Err(e) => {
                let mut actions = self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::unauthenticated(e.to_string()),
                );
                actions.push(ServerAction::CloseConnection {
                    session_id,
                    reason: "authentication failed".to_string(),
                });
                return actions;
            },
        };

        let accept_result = match self.sessions.get_mut(&session_id) {
            Some(session) => session.accept(session_id, user.clone(), now),
            None => return vec![],
        };

        let session_actions = match accept_result {
            Ok(actions) => actions,
            Err(e) => {
                let mut actions = self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::frame_rejected(format!("handshake rejected: {e}")),
                );
                actions.push(ServerAction::CloseConnection {
                    session_id,
                    reason: "handshake rejected".to_string(),
                });
                return actions;
            },
        };

        let mut actions: Vec<ServerAction<E::Instant>> = session_actions
            .into_iter()
            .map(|action| Self::convert_session_action(session_id, action))
            .collect();

        let Some(transition) = self.registry.register_session(session_id, user.clone()) else {
            // Unreachable after the accept() state check above
            actions.push(ServerAction::CloseConnection {
                session_id,
                reason: "session already registered".to_string(),
            });
            return actions;
        };

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} authenticated as {user}"),
            timestamp: now,
        });

        if let Some(update) = self.presence.apply(&transition) {
            actions.extend(self.presence_broadcast(update));
        }

        actions
    }

    /// Handle a direct message: persist, ack the sender, notify the
    /// recipient's live sessions. Offline recipients are dropped silently
    /// apart from a debug log; the message itself is already durable.
    fn handle_send_message(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();
        let request_id = frame.header.request_id();

        let Some(sender) = self.registry.user_for_session(session_id).cloned() else {
            return self.error_response(
                session_id,
                request_id,
                ErrorPayload::unauthenticated("SendMessage before handshake"),
            );
        };

        let message = match Payload::from_frame(frame) {
            Ok(Payload::SendMessage(message)) => message,
            Ok(_) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload("expected SendMessage payload"),
                );
            },
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload(format!("failed to decode SendMessage: {e}")),
                );
            },
        };

        if !self.auth.known_user(&message.recipient) {
            return self.error_response(
                session_id,
                request_id,
                ErrorPayload::stale_recipient(&message.recipient),
            );
        }

        let message_id = match self.messages.append(&sender, &message.recipient, &message.body) {
            Ok(id) => id,
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::store_error(e.to_string()),
                );
            },
        };

        let ack = Payload::MessageAck(MessageAck { message_id });
        let mut header = FrameHeader::new(Opcode::MessageAck);
        header.set_request_id(request_id);

        let mut actions = match ack.into_frame(header) {
            Ok(frame) => vec![ServerAction::SendToSession { session_id, frame }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode MessageAck: {e}"),
                timestamp: now,
            }],
        };

        let notification = Notification {
            kind: NotificationKind::Message,
            recipient: message.recipient.clone(),
            sender,
            body: message.body,
        };
        actions.extend(self.notify(&message.recipient, notification));

        actions
    }

    /// Handle a post like: fire-and-forget notification to the post author.
    fn handle_like_post(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Vec<ServerAction<E::Instant>> {
        let request_id = frame.header.request_id();

        let Some(sender) = self.registry.user_for_session(session_id).cloned() else {
            return self.error_response(
                session_id,
                request_id,
                ErrorPayload::unauthenticated("LikePost before handshake"),
            );
        };

        let like = match Payload::from_frame(frame) {
            Ok(Payload::LikePost(like)) => like,
            Ok(_) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload("expected LikePost payload"),
                );
            },
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload(format!("failed to decode LikePost: {e}")),
                );
            },
        };

        let notification = Notification {
            kind: NotificationKind::Like,
            recipient: like.post_author.clone(),
            sender,
            body: like.post_id,
        };
        self.notify(&like.post_author, notification)
    }

    /// Handle a follow toggle: flip the edge, reply with ground truth.
    ///
    /// The reply always carries the actor's full following list read back
    /// from the store after the toggle, never a value derived from the
    /// request. Clients reconcile their optimistic state against it.
    fn handle_follow_toggle(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();
        let request_id = frame.header.request_id();

        let Some(actor) = self.registry.user_for_session(session_id).cloned() else {
            return self.error_response(
                session_id,
                request_id,
                ErrorPayload::unauthenticated("FollowToggle before handshake"),
            );
        };

        let toggle = match Payload::from_frame(frame) {
            Ok(Payload::FollowToggle(toggle)) => toggle,
            Ok(_) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload("expected FollowToggle payload"),
                );
            },
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::invalid_payload(format!("failed to decode FollowToggle: {e}")),
                );
            },
        };

        let following = match self.graph.toggle_follow(&actor, &toggle.target) {
            Ok(following) => following,
            Err(e @ StoreError::SelfFollow(_)) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::graph_error(e.to_string()),
                );
            },
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::store_error(e.to_string()),
                );
            },
        };

        let following_list = match self.graph.following(&actor) {
            Ok(list) => list,
            Err(e) => {
                return self.error_response(
                    session_id,
                    request_id,
                    ErrorPayload::store_error(e.to_string()),
                );
            },
        };

        let reply = Payload::FollowToggleReply(FollowToggleReply {
            target: toggle.target.clone(),
            following,
            following_list,
        });
        let mut header = FrameHeader::new(Opcode::FollowToggleReply);
        header.set_request_id(request_id);

        match reply.into_frame(header) {
            Ok(frame) => vec![ServerAction::SendToSession { session_id, frame }, ServerAction::Log {
                level: LogLevel::Debug,
                message: format!(
                    "{actor} follow toggle on {} -> following={following}",
                    toggle.target
                ),
                timestamp: now,
            }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode FollowToggleReply: {e}"),
                timestamp: now,
            }],
        }
    }

    /// Handle a connection being closed.
    fn handle_connection_closed(
        &mut self,
        session_id: u64,
        reason: &str,
    ) -> Result<Vec<ServerAction<E::Instant>>, ServerError> {
        let now = self.env.now();
        let mut actions = Vec::new();

        if let Some(mut session) = self.sessions.remove(&session_id) {
            session.close();
        }

        if let Some((user, transition)) = self.registry.unregister_session(session_id) {
            actions.push(ServerAction::Log {
                level: LogLevel::Info,
                message: format!("session {session_id} ({user}) closed: {reason}"),
                timestamp: now,
            });

            if let Some(update) = self.presence.apply(&transition) {
                actions.extend(self.presence_broadcast(update));
            }
        } else {
            actions.push(ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("session {session_id} closed before handshake: {reason}"),
                timestamp: now,
            });
        }

        Ok(actions)
    }

    /// Handle periodic tick for heartbeats and timeout checking.
    fn handle_tick(&mut self) -> Result<Vec<ServerAction<E::Instant>>, ServerError> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let session_ids: Vec<u64> = self.sessions.keys().copied().collect();

        for session_id in session_ids {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                for action in session.tick(now) {
                    actions.push(Self::convert_session_action(session_id, action));
                }
            }
        }

        Ok(actions)
    }

    /// Route a notification to the recipient's live sessions.
    ///
    /// At most once per live session. When the recipient has no live
    /// sessions the notification is dropped silently; only a debug log
    /// records the drop.
    fn notify(
        &self,
        recipient: &UserId,
        notification: Notification,
    ) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();

        let targets = match EventRouter::route(&self.registry, recipient) {
            RouteOutcome::Delivered(targets) => targets,
            RouteOutcome::Dropped => {
                return vec![ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("{recipient} offline, notification dropped"),
                    timestamp: now,
                }];
            },
        };

        let payload = Payload::Notification(notification);
        let frame = match payload.into_frame(FrameHeader::new(Opcode::Notification)) {
            Ok(frame) => frame,
            Err(e) => {
                return vec![ServerAction::Log {
                    level: LogLevel::Error,
                    message: format!("failed to encode Notification: {e}"),
                    timestamp: now,
                }];
            },
        };

        targets
            .into_iter()
            .map(|session_id| ServerAction::SendToSession { session_id, frame: frame.clone() })
            .collect()
    }

    /// Encode a presence snapshot and broadcast it to every registered
    /// session.
    fn presence_broadcast(&self, update: PresenceUpdate) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();
        let online_count = update.online.len();

        let payload = Payload::PresenceUpdate(update);
        match payload.into_frame(FrameHeader::new(Opcode::PresenceUpdate)) {
            Ok(frame) => vec![ServerAction::Broadcast { frame }, ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("presence changed, {online_count} online"),
                timestamp: now,
            }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode PresenceUpdate: {e}"),
                timestamp: now,
            }],
        }
    }

    /// Build an error frame for a session, echoing the request id, plus a
    /// warn log.
    fn error_response(
        &self,
        session_id: u64,
        request_id: u32,
        payload: ErrorPayload,
    ) -> Vec<ServerAction<E::Instant>> {
        let now = self.env.now();
        let message = payload.message.clone();

        let mut header = FrameHeader::new(Opcode::Error);
        header.set_request_id(request_id);

        match Payload::Error(payload).into_frame(header) {
            Ok(frame) => vec![ServerAction::SendToSession { session_id, frame }, ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("rejected frame from session {session_id}: {message}"),
                timestamp: now,
            }],
            Err(e) => vec![ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode error response: {e}"),
                timestamp: now,
            }],
        }
    }

    fn convert_session_action(session_id: u64, action: SessionAction) -> ServerAction<E::Instant> {
        match action {
            SessionAction::SendFrame(frame) => ServerAction::SendToSession { session_id, frame },
            SessionAction::Close { reason } => {
                ServerAction::CloseConnection { session_id, reason }
            },
        }
    }

    /// Sessions that completed the handshake, i.e. broadcast targets.
    pub fn registered_sessions(&self) -> Vec<u64> {
        let mut sessions: Vec<u64> = self.registry.all_sessions().collect();
        sessions.sort_unstable();
        sessions
    }

    /// Number of active connections (including pre-handshake ones).
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current sorted online snapshot.
    pub fn online_snapshot(&self) -> Vec<UserId> {
        self.presence.snapshot().online
    }

    /// Whether an identity has at least one live session.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.registry.is_online(user)
    }

    /// Message store backend.
    pub fn messages(&self) -> &M {
        &self.messages
    }

    /// Social graph backend.
    pub fn graph(&self) -> &G {
        &self.graph
    }
}

impl<E, A, G, M> std::fmt::Debug for ServerDriver<E, A, G, M>
where
    E: Environment,
    A: Authenticator,
    G: SocialGraphStore,
    M: MessageStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.sessions.len())
            .field("online_count", &self.registry.online_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vibe_proto::payloads::{
        session::Hello,
        social::{FollowToggle, LikePost, SendMessage},
    };

    use super::*;
    use crate::{
        auth::TokenAuthenticator,
        stores::{MemoryMessageStore, MemorySocialGraph},
    };

    #[derive(Clone)]
    struct TestEnv {}

    impl Environment for TestEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> std::time::Instant {
            // Using real Instant for simplicity in unit tests
            std::time::Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            use rand::RngCore;
            rand::thread_rng().fill_bytes(buffer);
        }
    }

    type TestDriver =
        ServerDriver<TestEnv, TokenAuthenticator, MemorySocialGraph, MemoryMessageStore>;

    fn test_driver() -> TestDriver {
        ServerDriver::new(
            TestEnv {},
            TokenAuthenticator::permissive(),
            MemorySocialGraph::new(),
            MemoryMessageStore::new(),
            ServerConfig::default(),
        )
    }

    fn hello_frame(token: &str, request_id: u32) -> Frame {
        let payload = Payload::Hello(Hello { version: 1, auth_token: token.to_string() });
        let mut header = FrameHeader::new(Opcode::Hello);
        header.set_request_id(request_id);
        payload.into_frame(header).unwrap()
    }

    fn connect(driver: &mut TestDriver, session_id: u64, token: &str) -> Vec<ServerAction> {
        driver.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();
        driver
            .process_event(ServerEvent::FrameReceived {
                session_id,
                frame: hello_frame(token, 1),
            })
            .unwrap()
    }

    fn sent_frames(actions: &[ServerAction]) -> Vec<(u64, &Frame)> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::SendToSession { session_id, frame } => Some((*session_id, frame)),
                _ => None,
            })
            .collect()
    }

    fn broadcast_payloads(actions: &[ServerAction]) -> Vec<PresenceUpdate> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::Broadcast { frame } => match Payload::from_frame(frame) {
                    Ok(Payload::PresenceUpdate(update)) => Some(update),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn server_accepts_connection() {
        let mut server = test_driver();

        let actions =
            server.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        assert_eq!(server.connection_count(), 1);
        assert!(matches!(actions[0], ServerAction::Log { level: LogLevel::Debug, .. }));
    }

    #[test]
    fn server_rejects_when_max_connections_exceeded() {
        let mut server = ServerDriver::new(
            TestEnv {},
            TokenAuthenticator::permissive(),
            MemorySocialGraph::new(),
            MemoryMessageStore::new(),
            ServerConfig { max_connections: 2, ..Default::default() },
        );

        server.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();
        server.process_event(ServerEvent::ConnectionAccepted { session_id: 2 }).unwrap();

        let actions =
            server.process_event(ServerEvent::ConnectionAccepted { session_id: 3 }).unwrap();

        assert_eq!(server.connection_count(), 2);
        assert!(matches!(actions[0], ServerAction::CloseConnection { .. }));
    }

    #[test]
    fn handshake_establishes_and_broadcasts_presence() {
        let mut server = test_driver();

        let actions = connect(&mut server, 1, "alice");

        // HelloReply back to the new session
        let sent = sent_frames(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::HelloReply));

        // Exactly one presence broadcast with the full online set
        let broadcasts = broadcast_payloads(&actions);
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].online, vec![uid("alice")]);

        assert!(server.is_online(&uid("alice")));
        assert_eq!(server.registered_sessions(), vec![1]);
    }

    #[test]
    fn rejected_token_gets_error_and_close() {
        let mut server = ServerDriver::new(
            TestEnv {},
            TokenAuthenticator::new(),
            MemorySocialGraph::new(),
            MemoryMessageStore::new(),
            ServerConfig::default(),
        );

        let actions = connect(&mut server, 1, "nobody");

        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::Error));
        assert!(actions.iter().any(|a| matches!(a, ServerAction::CloseConnection { .. })));
        assert!(server.online_snapshot().is_empty());
    }

    #[test]
    fn second_device_does_not_rebroadcast_presence() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");
        let actions = connect(&mut server, 2, "alice");

        assert!(broadcast_payloads(&actions).is_empty());
        assert_eq!(server.online_snapshot(), vec![uid("alice")]);
        assert_eq!(server.registered_sessions().len(), 2);
    }

    #[test]
    fn last_device_disconnect_broadcasts_offline() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");
        connect(&mut server, 2, "alice");

        // First device away: still online, no broadcast
        let actions = server
            .process_event(ServerEvent::ConnectionClosed {
                session_id: 1,
                reason: "client disconnect".to_string(),
            })
            .unwrap();
        assert!(broadcast_payloads(&actions).is_empty());
        assert!(server.is_online(&uid("alice")));

        // Last device away: offline, one broadcast with the empty set
        let actions = server
            .process_event(ServerEvent::ConnectionClosed {
                session_id: 2,
                reason: "client disconnect".to_string(),
            })
            .unwrap();
        let broadcasts = broadcast_payloads(&actions);
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].online.is_empty());
        assert!(!server.is_online(&uid("alice")));
    }

    #[test]
    fn message_is_persisted_acked_and_delivered() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");
        connect(&mut server, 2, "bob");

        let payload = Payload::SendMessage(SendMessage {
            recipient: uid("bob"),
            body: "hey".to_string(),
        });
        let mut header = FrameHeader::new(Opcode::SendMessage);
        header.set_request_id(42);
        let frame = payload.into_frame(header).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);

        // Ack back to alice, echoing the request id
        let ack = sent.iter().find(|(sid, _)| *sid == 1).unwrap();
        assert_eq!(ack.1.header.opcode_enum(), Some(Opcode::MessageAck));
        assert_eq!(ack.1.header.request_id(), 42);

        // Notification to bob's session
        let notif = sent.iter().find(|(sid, _)| *sid == 2).unwrap();
        assert_eq!(notif.1.header.opcode_enum(), Some(Opcode::Notification));
        match Payload::from_frame(notif.1).unwrap() {
            Payload::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Message);
                assert_eq!(n.sender, uid("alice"));
                assert_eq!(n.body, "hey");
            },
            other => panic!("unexpected payload: {other:?}"),
        }

        // Persisted regardless of delivery
        let stored = server.messages().conversation(&uid("alice"), &uid("bob")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body, "hey");
    }

    #[test]
    fn message_to_offline_user_is_dropped_silently() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");

        let payload = Payload::SendMessage(SendMessage {
            recipient: uid("bob"),
            body: "hey".to_string(),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::SendMessage)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        // Only the ack goes out; no notification, no error
        let sent = sent_frames(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::MessageAck));

        // Still persisted
        let stored = server.messages().conversation(&uid("alice"), &uid("bob")).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn message_to_unknown_user_is_rejected_as_stale() {
        let auth = TokenAuthenticator::new();
        auth.insert("tok-alice", uid("alice"));
        let mut server = ServerDriver::new(
            TestEnv {},
            auth,
            MemorySocialGraph::new(),
            MemoryMessageStore::new(),
            ServerConfig::default(),
        );

        connect(&mut server, 1, "tok-alice");

        let payload = Payload::SendMessage(SendMessage {
            recipient: uid("ghost"),
            body: "hey".to_string(),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::SendMessage)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::Error));
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::Error(e) => assert_eq!(e.code, ErrorPayload::STALE_RECIPIENT),
            other => panic!("unexpected payload: {other:?}"),
        }

        // Nothing persisted
        assert!(server.messages().latest_message_id().unwrap().is_none());
    }

    #[test]
    fn like_notifies_online_post_author() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");
        connect(&mut server, 2, "bob");

        let payload = Payload::LikePost(LikePost {
            post_author: uid("bob"),
            post_id: "post-7".to_string(),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::LikePost)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 2);
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::Notification(n) => {
                assert_eq!(n.kind, NotificationKind::Like);
                assert_eq!(n.body, "post-7");
            },
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn follow_toggle_replies_with_ground_truth_list() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");

        let payload = Payload::FollowToggle(FollowToggle { target: uid("bob") });
        let mut header = FrameHeader::new(Opcode::FollowToggle);
        header.set_request_id(9);
        let frame = payload.into_frame(header).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::FollowToggleReply));
        assert_eq!(sent[0].1.header.request_id(), 9);
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::FollowToggleReply(reply) => {
                assert!(reply.following);
                assert_eq!(reply.following_list, vec![uid("bob")]);
            },
            other => panic!("unexpected payload: {other:?}"),
        }

        // Toggling again unfollows
        let payload = Payload::FollowToggle(FollowToggle { target: uid("bob") });
        let frame = payload.into_frame(FrameHeader::new(Opcode::FollowToggle)).unwrap();
        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::FollowToggleReply(reply) => {
                assert!(!reply.following);
                assert!(reply.following_list.is_empty());
            },
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn self_follow_is_rejected_with_graph_error() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");

        let payload = Payload::FollowToggle(FollowToggle { target: uid("alice") });
        let frame = payload.into_frame(FrameHeader::new(Opcode::FollowToggle)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::Error));
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::Error(e) => assert_eq!(e.code, ErrorPayload::GRAPH_ERROR),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn data_frame_before_handshake_is_rejected() {
        let mut server = test_driver();

        server.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let payload = Payload::SendMessage(SendMessage {
            recipient: uid("bob"),
            body: "hey".to_string(),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::SendMessage)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::Error));
        match Payload::from_frame(sent[0].1).unwrap() {
            Payload::Error(e) => assert_eq!(e.code, ErrorPayload::UNAUTHENTICATED),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn frame_from_unknown_session_is_an_error() {
        let mut server = test_driver();

        let result = server.process_event(ServerEvent::FrameReceived {
            session_id: 999,
            frame: hello_frame("alice", 1),
        });

        assert!(matches!(result, Err(ServerError::SessionNotFound(999))));
    }

    #[test]
    fn server_to_client_opcode_from_client_is_rejected() {
        let mut server = test_driver();

        connect(&mut server, 1, "alice");

        let payload = Payload::PresenceUpdate(PresenceUpdate { online: vec![] });
        let frame = payload.into_frame(FrameHeader::new(Opcode::PresenceUpdate)).unwrap();

        let actions =
            server.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();
        let sent = sent_frames(&actions);
        assert_eq!(sent[0].1.header.opcode_enum(), Some(Opcode::Error));
    }
}
