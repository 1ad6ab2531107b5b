//! Session layer state machine.
//!
//! Manages connection lifecycle, heartbeats, timeouts, and graceful shutdown.
//! Uses the action pattern: methods take time as input and return actions for
//! the driver to execute. This keeps the state machine pure (no I/O) and makes
//! testing straightforward.
//!
//! Authentication is a driver concern: the server driver resolves the Hello
//! token through its authenticator and then calls [`Session::accept`], so
//! this machine never sees credentials.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  Hello   ┌──────────┐   HelloReply    ┌─────────────┐
//! │ Init │─────────>│ Pending  │────────────────>│ Established │
//! └──────┘          └──────────┘                 └─────────────┘
//!                        │                               │
//!                        │ Timeout/Error                 │ Goodbye/Timeout
//!                        ↓                               ↓
//!                   ┌────────┐                      ┌────────┐
//!                   │ Closed │<─────────────────────│ Closed │
//!                   └────────┘                      └────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use vibe_proto::{
    Frame, FrameHeader, Opcode, Payload, UserId,
    payloads::session::{Goodbye, Hello, HelloReply},
};

use crate::error::SessionError;

/// Time allowed to complete the Hello/HelloReply handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time allowed without any activity before the session is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which the session sends Ping frames while established.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by the session state machine.
///
/// The driver (test harness or production server) executes these actions:
/// - `SendFrame`: Serialize and send the frame over the transport
/// - `Close`: Close the connection with the given reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state, no handshake started
    Init,
    /// Hello sent, waiting for HelloReply
    Pending,
    /// Handshake complete, identity bound
    Established,
    /// Session closed (graceful or error)
    Closed,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for completing handshake
    pub handshake_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2)
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Session state machine
///
/// Manages lifecycle, timeouts, and heartbeats for a single connection.
///
/// This is a pure state machine: no I/O, no Environment storage. Time is
/// passed as parameters to methods that need it.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: SessionState,
    /// Configuration
    config: SessionConfig,
    /// Last activity timestamp
    last_activity: I,
    /// Last heartbeat sent timestamp
    last_heartbeat: Option<I>,
    /// Session ID (assigned by server)
    session_id: Option<u64>,
    /// Identity bound at handshake completion
    user: Option<UserId>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new session in [`SessionState::Init`] state
    pub fn new(now: I, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Init,
            config,
            last_activity: now,
            last_heartbeat: None,
            session_id: None,
            user: None,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session ID assigned by server. `None` until established.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Identity bound at handshake. `None` until established.
    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Maximum time allowed for handshake completion.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout
    }

    /// Initiate handshake (client use).
    ///
    /// Transitions to Pending state and returns SendFrame(Hello) action.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in Init state
    pub fn send_hello(
        &mut self,
        auth_token: &str,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Init {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "send_hello".to_string(),
            });
        }

        self.state = SessionState::Pending;
        self.last_activity = now;

        let hello = Payload::Hello(Hello { version: 1, auth_token: auth_token.to_string() });
        let frame = hello.into_frame(FrameHeader::new(Opcode::Hello))?;

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Complete the handshake for an authenticated client (server use).
    ///
    /// The driver calls this after the Hello token resolved to an identity.
    /// Transitions to Established and returns SendFrame(HelloReply).
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in Init state
    pub fn accept(
        &mut self,
        session_id: u64,
        user: UserId,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Init {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "accept".to_string(),
            });
        }

        debug_assert_ne!(session_id, 0);

        self.session_id = Some(session_id);
        self.user = Some(user.clone());
        self.state = SessionState::Established;
        self.last_activity = now;

        let reply = Payload::HelloReply(HelloReply { session_id, user });
        let frame = reply.into_frame(FrameHeader::new(Opcode::HelloReply))?;

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Mark session as closed.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Mark session as active (call when receiving frames).
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity, if timeout exceeded. `None` otherwise.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            SessionState::Pending => self.config.handshake_timeout,
            SessionState::Established => self.config.idle_timeout,
            _ => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    ///
    /// Call this periodically to trigger timeout detection and heartbeat
    /// sending.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        // Check for timeout
        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                SessionState::Pending => format!("handshake timeout after {:?}", elapsed),
                SessionState::Established => format!("idle timeout after {:?}", elapsed),
                _ => "timeout".to_string(),
            };

            self.close();
            actions.push(SessionAction::Close { reason });
            return actions;
        }

        if self.state == SessionState::Established {
            let should_send = match self.last_heartbeat {
                None => true, // Never sent heartbeat
                Some(last) => {
                    let elapsed = now - last;
                    elapsed >= self.config.heartbeat_interval
                },
            };

            if should_send {
                let ping_header = FrameHeader::new(Opcode::Ping);
                let ping_frame = Frame::new(ping_header, Vec::new());

                actions.push(SessionAction::SendFrame(ping_frame));
                self.last_heartbeat = Some(now);
                self.last_activity = now;
            }
        }

        actions
    }

    /// Process an incoming lifecycle frame and update state.
    ///
    /// Data frames (presence, notifications, triggers) are the driver's
    /// business; they pass through the Established arm here only to record
    /// activity and enforce that they never arrive pre-handshake.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnexpectedFrame` if opcode invalid for current state
    /// - `SessionError::InvalidPayload` if CBOR deserialization fails
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.last_activity = now;

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(SessionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            // Client: receive HelloReply in Pending state
            (SessionState::Pending, Opcode::HelloReply) => {
                let payload = Payload::from_frame(frame)?;

                match payload {
                    Payload::HelloReply(reply) => {
                        self.state = SessionState::Established;
                        self.session_id = Some(reply.session_id);
                        self.user = Some(reply.user);

                        Ok(vec![]) // No response needed
                    },
                    _ => Err(SessionError::InvalidPayload {
                        expected: "HelloReply",
                        opcode: Opcode::HelloReply.to_u16(),
                    }),
                }
            },

            // Both: Ping when Established
            (SessionState::Established, Opcode::Ping) => {
                let pong_header = FrameHeader::new(Opcode::Pong);
                let pong_frame = Frame::new(pong_header, Vec::new());
                Ok(vec![SessionAction::SendFrame(pong_frame)])
            },

            // Both: Pong when Established
            (SessionState::Established, Opcode::Pong) => {
                // Activity already updated
                Ok(vec![])
            },

            // Both: Goodbye (any state except Closed)
            (state, Opcode::Goodbye) if state != SessionState::Closed => {
                let payload = Payload::from_frame(frame)?;

                let reason = match payload {
                    Payload::Goodbye(goodbye) => goodbye.reason,
                    _ => {
                        return Err(SessionError::InvalidPayload {
                            expected: "Goodbye",
                            opcode: Opcode::Goodbye.to_u16(),
                        });
                    },
                };

                self.state = SessionState::Closed;

                let reply = Payload::Goodbye(Goodbye { reason: "ack".to_string() });
                let frame = reply.into_frame(FrameHeader::new(Opcode::Goodbye))?;

                Ok(vec![SessionAction::SendFrame(frame), SessionAction::Close {
                    reason: format!("peer goodbye: {}", reason),
                }])
            },

            // Error during handshake means the peer refused us
            (SessionState::Init | SessionState::Pending, Opcode::Error) => {
                self.state = SessionState::Closed;

                Ok(vec![SessionAction::Close { reason: "handshake refused".to_string() }])
            },

            // Data frames are valid while Established; the driver interprets
            // the payload, this machine only tracks liveness. Established
            // Error frames carry per-request failures and are not fatal.
            (
                SessionState::Established,
                Opcode::PresenceUpdate
                | Opcode::Notification
                | Opcode::SendMessage
                | Opcode::MessageAck
                | Opcode::LikePost
                | Opcode::FollowToggle
                | Opcode::FollowToggleReply
                | Opcode::Error,
            ) => Ok(vec![]),

            // Default: unexpected frame for current state
            (state, opcode) => {
                Err(SessionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic for tests
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = i as u8;
            }
        }
    }

    fn established_client(t0: Instant) -> Session {
        let mut session = Session::new(t0, SessionConfig::default());
        session.send_hello("tok-alice", t0).unwrap();

        let reply = Payload::HelloReply(HelloReply {
            session_id: 12345,
            user: UserId::new("alice"),
        });
        let reply_frame = reply.into_frame(FrameHeader::new(Opcode::HelloReply)).unwrap();
        session.handle_frame(&reply_frame, t0).unwrap();

        session
    }

    #[test]
    fn session_lifecycle() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = Session::new(t0, SessionConfig::default());

        // Initial state
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(session.session_id(), None);

        // Send Hello
        let actions = session.send_hello("tok-alice", t0).unwrap();
        assert_eq!(session.state(), SessionState::Pending);
        assert_eq!(actions.len(), 1); // Returns SendFrame(Hello) action
        assert!(matches!(actions[0], SessionAction::SendFrame(_)));

        // Receive HelloReply
        let reply = Payload::HelloReply(HelloReply {
            session_id: 12345,
            user: UserId::new("alice"),
        });
        let reply_frame = reply.into_frame(FrameHeader::new(Opcode::HelloReply)).unwrap();
        let actions = session.handle_frame(&reply_frame, t0).unwrap();
        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.session_id(), Some(12345));
        assert_eq!(session.user(), Some(&UserId::new("alice")));
        assert!(actions.is_empty());

        // Close
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn handle_ping_responds_with_pong() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());

        // Handle Ping - should return Pong action
        let actions = session.handle_frame(&ping_frame, t0).unwrap();
        assert_eq!(actions.len(), 1);

        match &actions[0] {
            SessionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::Pong));
                assert_eq!(frame.payload.len(), 0);
            },
            _ => panic!("Expected SendFrame action with Pong"),
        }
    }

    #[test]
    fn handle_pong_updates_activity() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let pong_frame = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());

        // Handle Pong
        let t1 = t0 + Duration::from_secs(30);
        let actions = session.handle_frame(&pong_frame, t1).unwrap();
        assert!(actions.is_empty());

        // Activity should be updated (not timed out)
        let t2 = t1 + Duration::from_secs(40); // 40s after Pong, but only 10s from last activity
        assert!(session.check_timeout(t2).is_none());
    }

    #[test]
    fn handle_ping_before_established() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session: Session = Session::new(t0, SessionConfig::default());

        let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());

        // Should fail - handshake not complete
        let result = session.handle_frame(&ping_frame, t0);
        assert!(matches!(result, Err(SessionError::UnexpectedFrame { .. })));
    }

    #[test]
    fn server_accept_binds_identity() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session: Session = Session::new(t0, SessionConfig::default());

        let session_id = env.random_u64();
        let actions = session.accept(session_id, UserId::new("alice"), t0).unwrap();

        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.session_id(), Some(session_id));
        assert_eq!(session.user(), Some(&UserId::new("alice")));
        assert_eq!(actions.len(), 1);

        match &actions[0] {
            SessionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::HelloReply));

                // Verify HelloReply carries the bound identity
                let payload = Payload::from_frame(frame).unwrap();
                match payload {
                    Payload::HelloReply(reply) => {
                        assert_eq!(reply.session_id, session_id);
                        assert_eq!(reply.user, UserId::new("alice"));
                    },
                    _ => panic!("Expected HelloReply payload"),
                }
            },
            _ => panic!("Expected SendFrame action"),
        }
    }

    #[test]
    fn accept_rejects_if_not_init_state() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let result = session.accept(999, UserId::new("bob"), t0);
        assert!(matches!(result, Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn handle_goodbye_established() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        // Send Goodbye
        let goodbye = Payload::Goodbye(Goodbye { reason: "client shutdown".to_string() });
        let goodbye_frame = goodbye.into_frame(FrameHeader::new(Opcode::Goodbye)).unwrap();

        let actions = session.handle_frame(&goodbye_frame, t0).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(actions.len(), 2);

        // Should send Goodbye ack and Close
        assert!(matches!(actions[0], SessionAction::SendFrame(_)));
        assert!(matches!(actions[1], SessionAction::Close { .. }));
    }

    #[test]
    fn handle_goodbye_pending() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session: Session = Session::new(t0, SessionConfig::default());

        // Move to pending
        session.send_hello("tok-alice", t0).unwrap();

        // Send Goodbye while still pending
        let goodbye = Payload::Goodbye(Goodbye { reason: "timeout".to_string() });
        let goodbye_frame = goodbye.into_frame(FrameHeader::new(Opcode::Goodbye)).unwrap();

        let actions = session.handle_frame(&goodbye_frame, t0).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn error_during_handshake_closes_session() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = Session::new(t0, SessionConfig::default());
        session.send_hello("tok", t0).unwrap();

        let payload = Payload::Error(vibe_proto::ErrorPayload::unauthenticated("bad token"));
        let error_frame = payload.into_frame(FrameHeader::new(Opcode::Error)).unwrap();

        let actions = session.handle_frame(&error_frame, t0).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Close { .. }));
    }

    #[test]
    fn established_error_frame_is_not_fatal() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let payload = Payload::Error(vibe_proto::ErrorPayload::frame_rejected("bad frame"));
        let error_frame = payload.into_frame(FrameHeader::new(Opcode::Error)).unwrap();

        let actions = session.handle_frame(&error_frame, t0).unwrap();
        assert_eq!(session.state(), SessionState::Established);
        assert!(actions.is_empty());
    }

    #[test]
    fn data_frames_pass_through_when_established() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let payload = Payload::PresenceUpdate(vibe_proto::payloads::presence::PresenceUpdate {
            online: vec![UserId::new("alice")],
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::PresenceUpdate)).unwrap();

        let actions = session.handle_frame(&frame, t0).unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.state(), SessionState::Established);
    }

    #[test]
    fn data_frames_rejected_before_handshake() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session: Session = Session::new(t0, SessionConfig::default());

        let payload = Payload::FollowToggle(vibe_proto::payloads::social::FollowToggle {
            target: UserId::new("bob"),
        });
        let frame = payload.into_frame(FrameHeader::new(Opcode::FollowToggle)).unwrap();

        let result = session.handle_frame(&frame, t0);
        assert!(matches!(result, Err(SessionError::UnexpectedFrame { .. })));
    }

    #[test]
    fn tick_sends_heartbeat_when_established() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        // First tick sends a Ping immediately
        let actions = session.tick(t0);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            SessionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::Ping));
            },
            _ => panic!("Expected SendFrame action"),
        }

        // Immediately after, no further heartbeat
        let actions = session.tick(t0 + Duration::from_secs(1));
        assert!(actions.is_empty());

        // After the heartbeat interval, another Ping
        let actions = session.tick(t0 + DEFAULT_HEARTBEAT_INTERVAL + Duration::from_secs(1));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn tick_closes_on_idle_timeout() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session = established_client(t0);

        let late = t0 + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1);
        let actions = session.tick(late);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Close { .. }));
    }

    #[test]
    fn tick_closes_on_handshake_timeout() {
        let env = TestEnv;
        let t0 = env.now();
        let mut session: Session = Session::new(t0, SessionConfig::default());
        session.send_hello("tok-alice", t0).unwrap();

        let late = t0 + DEFAULT_HANDSHAKE_TIMEOUT + Duration::from_secs(1);
        let actions = session.tick(late);

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(actions[0], SessionAction::Close { .. }));
    }
}
