//! Client state machine.
//!
//! The `Client` is the top-level state machine that manages the session
//! lifecycle, mirrors server-pushed presence, surfaces notifications, and
//! reconciles optimistic follow toggles against server replies.

use std::collections::{BTreeSet, HashMap};

use vibe_core::{
    env::Environment,
    session::{Session, SessionConfig, SessionState},
    SessionAction,
};
use vibe_proto::{
    Frame, FrameHeader, Opcode, Payload, UserId,
    payloads::{
        session::Goodbye,
        social::{FollowToggle, LikePost, SendMessage},
    },
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
    follow::FollowCoordinator,
};

/// Client for interacting with a `VIBE` server.
pub struct Client<E: Environment> {
    /// Environment for timing.
    env: E,

    /// Session lifecycle state machine.
    session: Session<E::Instant>,

    /// Optimistic follow-toggle reconciliation.
    follow: FollowCoordinator<E::Instant>,

    /// Mirror of the last presence snapshot pushed by the server.
    online: Vec<UserId>,

    /// Identities the application knows about.
    ///
    /// Chat selections are validated against this set at send time; a
    /// recipient that disappears from it makes the selection stale.
    profiles: BTreeSet<UserId>,

    /// Currently selected conversation partner.
    selected_chat: Option<UserId>,

    /// Next request id, wrapping. Starts at 1 so 0 means "no correlation".
    next_request_id: u32,

    /// Outstanding follow toggles by request id, for reply correlation.
    pending_toggles: HashMap<u32, UserId>,
}

impl<E: Environment> Client<E> {
    /// Create a new client with a fresh session.
    pub fn new(env: E) -> Self {
        let session = Session::new(env.now(), SessionConfig::default());

        Self {
            env,
            session,
            follow: FollowCoordinator::new(),
            online: Vec::new(),
            profiles: BTreeSet::new(),
            selected_chat: None,
            next_request_id: 1,
            pending_toggles: HashMap::new(),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Session id assigned by the server. `None` until established.
    pub fn session_id(&self) -> Option<u64> {
        self.session.session_id()
    }

    /// Our authenticated identity. `None` until established.
    pub fn user(&self) -> Option<&UserId> {
        self.session.user()
    }

    /// The last presence snapshot received, sorted.
    pub fn online(&self) -> &[UserId] {
        &self.online
    }

    /// Whether an identity is in the last presence snapshot.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.binary_search(user).is_ok()
    }

    /// The currently selected conversation partner.
    pub fn selected_chat(&self) -> Option<&UserId> {
        self.selected_chat.as_ref()
    }

    /// The displayed follow flag for `target` (optimistic value while a
    /// toggle is pending).
    pub fn is_following(&self, target: &UserId) -> bool {
        self.follow.is_following(target)
    }

    /// Whether a follow toggle for `target` is awaiting the server's verdict.
    pub fn is_follow_pending(&self, target: &UserId) -> bool {
        self.follow.is_pending(target)
    }

    /// The last server-confirmed follow list.
    pub fn following_list(&self) -> &[UserId] {
        self.follow.following_list()
    }

    /// Seed the confirmed follow list, e.g. from a profile fetch.
    pub fn load_following(&mut self, following: Vec<UserId>) {
        self.follow.load_following(following);
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connect { auth_token } => self.handle_connect(&auth_token),
            ClientEvent::FrameReceived(frame) => self.handle_frame(&frame),
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::ProfilesLoaded { users } => {
                self.profiles = users.into_iter().collect();
                Ok(vec![])
            },
            ClientEvent::SelectChat { user } => {
                self.selected_chat = Some(user);
                Ok(vec![])
            },
            ClientEvent::SendMessage { body } => self.handle_send_message(body),
            ClientEvent::LikePost { post_author, post_id } => {
                self.handle_like_post(post_author, post_id)
            },
            ClientEvent::ToggleFollow { target } => self.handle_toggle_follow(target),
            ClientEvent::Disconnect { reason } => self.handle_disconnect(reason),
        }
    }

    fn handle_connect(&mut self, auth_token: &str) -> Result<Vec<ClientAction>, ClientError> {
        let actions = self.session.send_hello(auth_token, self.env.now())?;
        Ok(convert_session_actions(actions))
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ClientAction>, ClientError> {
        let opcode = frame.header.opcode_enum().ok_or_else(|| ClientError::InvalidFrame {
            reason: format!("unknown opcode: {:#06x}", frame.header.opcode()),
        })?;

        // The session machine sees every frame first: it enforces the
        // handshake gate, records activity, and answers Pings itself.
        let now = self.env.now();
        let mut actions = convert_session_actions(self.session.handle_frame(frame, now)?);

        match opcode {
            Opcode::HelloReply => {
                if self.session.state() == SessionState::Established {
                    let session_id =
                        self.session.session_id().ok_or_else(|| ClientError::InvalidFrame {
                            reason: "established without a session id".to_string(),
                        })?;
                    let user = self.session.user().ok_or_else(|| ClientError::InvalidFrame {
                        reason: "established without an identity".to_string(),
                    })?;

                    actions.push(ClientAction::Established { session_id, user: user.clone() });
                }
                Ok(actions)
            },

            Opcode::Ping | Opcode::Pong | Opcode::Goodbye => Ok(actions),

            Opcode::PresenceUpdate => {
                let Payload::PresenceUpdate(update) = decode_payload(frame)? else {
                    return Err(unexpected_payload("PresenceUpdate"));
                };

                self.online = update.online.clone();
                actions.push(ClientAction::PresenceChanged { online: update.online });
                Ok(actions)
            },

            Opcode::Notification => {
                let Payload::Notification(notification) = decode_payload(frame)? else {
                    return Err(unexpected_payload("Notification"));
                };

                actions.push(ClientAction::NotificationReceived(notification));
                Ok(actions)
            },

            Opcode::MessageAck => {
                let Payload::MessageAck(ack) = decode_payload(frame)? else {
                    return Err(unexpected_payload("MessageAck"));
                };

                actions.push(ClientAction::MessageAcked { message_id: ack.message_id });
                Ok(actions)
            },

            Opcode::FollowToggleReply => {
                let Payload::FollowToggleReply(reply) = decode_payload(frame)? else {
                    return Err(unexpected_payload("FollowToggleReply"));
                };

                self.pending_toggles.remove(&frame.header.request_id());
                self.follow.confirm(&reply.target, reply.following, reply.following_list.clone());

                actions.push(ClientAction::FollowConfirmed {
                    target: reply.target,
                    following: reply.following,
                    following_list: reply.following_list,
                });
                Ok(actions)
            },

            Opcode::Error => {
                // A handshake-phase Error already closed the session above.
                if self.session.state() != SessionState::Established {
                    return Ok(actions);
                }

                let Payload::Error(error) = decode_payload(frame)? else {
                    return Err(unexpected_payload("Error"));
                };

                if let Some(target) = self.pending_toggles.remove(&frame.header.request_id()) {
                    let reverted_to = self.follow.fail(&target).unwrap_or(false);
                    actions.push(ClientAction::FollowToggleFailed {
                        target,
                        reverted_to,
                        reason: error.message,
                    });
                } else {
                    actions.push(ClientAction::Log {
                        message: format!(
                            "server error {:#06x}: {}",
                            error.code, error.message
                        ),
                    });
                }
                Ok(actions)
            },

            // Client-to-server opcodes never arrive from the server.
            Opcode::Hello | Opcode::SendMessage | Opcode::LikePost | Opcode::FollowToggle => {
                Err(ClientError::InvalidFrame {
                    reason: format!("server sent client-only opcode {opcode:?}"),
                })
            },
        }
    }

    fn handle_send_message(&mut self, body: String) -> Result<Vec<ClientAction>, ClientError> {
        self.require_established()?;

        let recipient = self.selected_chat.clone().ok_or(ClientError::NoChatSelected)?;

        if !self.profiles.contains(&recipient) {
            return Err(ClientError::StaleSelection { recipient });
        }

        let request_id = self.next_request_id();
        let frame = encode_request(
            Payload::SendMessage(SendMessage { recipient, body }),
            request_id,
        )?;

        Ok(vec![ClientAction::Send(frame)])
    }

    fn handle_like_post(
        &mut self,
        post_author: UserId,
        post_id: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.require_established()?;

        let request_id = self.next_request_id();
        let frame =
            encode_request(Payload::LikePost(LikePost { post_author, post_id }), request_id)?;

        Ok(vec![ClientAction::Send(frame)])
    }

    fn handle_toggle_follow(&mut self, target: UserId) -> Result<Vec<ClientAction>, ClientError> {
        self.require_established()?;

        let shown = self.follow.toggle(target.clone(), self.env.now())?;

        let request_id = self.next_request_id();
        self.pending_toggles.insert(request_id, target.clone());

        let frame = encode_request(
            Payload::FollowToggle(FollowToggle { target: target.clone() }),
            request_id,
        )?;

        Ok(vec![ClientAction::Send(frame), ClientAction::Log {
            message: format!("follow {target} optimistically set to {shown}, awaiting server"),
        }])
    }

    fn handle_disconnect(&mut self, reason: String) -> Result<Vec<ClientAction>, ClientError> {
        let goodbye = Payload::Goodbye(Goodbye { reason: reason.clone() });
        let frame = goodbye
            .into_frame(FrameHeader::new(Opcode::Goodbye))
            .map_err(|e| ClientError::InvalidFrame { reason: e.to_string() })?;

        self.session.close();

        Ok(vec![ClientAction::Send(frame), ClientAction::ConnectionClosed { reason }])
    }

    /// Handle tick (heartbeats, idle timeout, pending toggle expiry).
    fn handle_tick(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = convert_session_actions(self.session.tick(now));

        for (target, reverted_to) in self.follow.tick(now) {
            self.pending_toggles.retain(|_, pending| *pending != target);
            actions.push(ClientAction::FollowToggleFailed {
                target,
                reverted_to,
                reason: "no reply from server before timeout".to_string(),
            });
        }

        Ok(actions)
    }

    fn require_established(&self) -> Result<(), ClientError> {
        if self.session.state() == SessionState::Established {
            Ok(())
        } else {
            Err(ClientError::NotEstablished { state: format!("{:?}", self.session.state()) })
        }
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }
}

fn convert_session_actions(actions: Vec<SessionAction>) -> Vec<ClientAction> {
    actions
        .into_iter()
        .map(|action| match action {
            SessionAction::SendFrame(frame) => ClientAction::Send(frame),
            SessionAction::Close { reason } => ClientAction::ConnectionClosed { reason },
        })
        .collect()
}

fn decode_payload(frame: &Frame) -> Result<Payload, ClientError> {
    Payload::from_frame(frame)
        .map_err(|e| ClientError::InvalidFrame { reason: e.to_string() })
}

fn unexpected_payload(expected: &str) -> ClientError {
    ClientError::InvalidFrame { reason: format!("payload does not match opcode {expected}") }
}

fn encode_request(payload: Payload, request_id: u32) -> Result<Frame, ClientError> {
    let mut header = FrameHeader::new(payload.opcode());
    header.set_request_id(request_id);

    payload
        .into_frame(header)
        .map_err(|e| ClientError::InvalidFrame { reason: e.to_string() })
}
