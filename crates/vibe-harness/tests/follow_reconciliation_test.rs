//! Client/server follow reconciliation tests.
//!
//! Pairs the Sans-IO client directly with the server driver, forwarding
//! frames both ways without a network, and checks the optimistic toggle
//! lifecycle end to end: apply, confirm with ground truth, revert on
//! failure.

use vibe_client::{Client, ClientAction, ClientEvent};
use vibe_harness::{SimDriver, SimEnv};
use vibe_proto::UserId;
use vibe_server::{
    DriverConfig, MessageStore, ServerAction, ServerDriver, ServerEvent, SocialGraphStore,
    auth::TokenAuthenticator,
    stores::{MemoryMessageStore, MemorySocialGraph},
};

const SESSION_ID: u64 = 1;

fn uid(name: &str) -> UserId {
    UserId::new(name)
}

fn server() -> SimDriver {
    ServerDriver::new(
        SimEnv::with_seed(42),
        TokenAuthenticator::permissive(),
        MemorySocialGraph::new(),
        MemoryMessageStore::new(),
        DriverConfig::default(),
    )
}

/// Forward client actions to the server and server actions back, until both
/// sides go quiet. Returns everything the client surfaced along the way.
fn pump(
    server: &mut SimDriver,
    client: &mut Client<SimEnv>,
    initial: Vec<ClientAction>,
) -> Vec<ClientAction> {
    let mut surfaced = Vec::new();
    let mut to_server: Vec<_> = Vec::new();

    let mut pending = initial;
    loop {
        for action in pending.drain(..) {
            match action {
                ClientAction::Send(frame) => to_server.push(frame),
                other => surfaced.push(other),
            }
        }

        let Some(frame) = to_server.pop() else { break };

        let server_actions = server
            .process_event(ServerEvent::FrameReceived { session_id: SESSION_ID, frame })
            .expect("server accepts client frame");

        for action in server_actions {
            match action {
                ServerAction::SendToSession { session_id, frame } if session_id == SESSION_ID => {
                    pending.extend(client.handle(ClientEvent::FrameReceived(frame)).unwrap());
                },
                ServerAction::Broadcast { frame } => {
                    pending.extend(client.handle(ClientEvent::FrameReceived(frame)).unwrap());
                },
                _ => {},
            }
        }
    }

    surfaced
}

/// Connect and establish a client as `name` against `server`.
fn establish(server: &mut SimDriver, name: &str) -> Client<SimEnv> {
    let mut client = Client::new(SimEnv::with_seed(7));

    server.process_event(ServerEvent::ConnectionAccepted { session_id: SESSION_ID }).unwrap();
    let actions = client.handle(ClientEvent::Connect { auth_token: name.to_string() }).unwrap();
    let surfaced = pump(server, &mut client, actions);

    assert!(surfaced.iter().any(|a| matches!(a, ClientAction::Established { .. })));
    assert_eq!(client.user(), Some(&uid(name)));

    client
}

#[test]
fn handshake_syncs_presence_mirror() {
    let mut server = server();
    let client = establish(&mut server, "alice");

    // The arrival broadcast reached the client's mirror.
    assert!(client.is_online(&uid("alice")));
    assert_eq!(client.online(), &[uid("alice")]);
}

#[test]
fn follow_toggle_confirms_with_ground_truth() {
    let mut server = server();
    let mut client = establish(&mut server, "alice");

    // The store already has an edge this client has never seen.
    server.graph().seed_follow(&uid("alice"), &uid("dave"));

    let actions = client.handle(ClientEvent::ToggleFollow { target: uid("bob") }).unwrap();
    assert!(client.is_follow_pending(&uid("bob")));

    let surfaced = pump(&mut server, &mut client, actions);

    assert!(surfaced.iter().any(|a| matches!(
        a,
        ClientAction::FollowConfirmed { following: true, .. }
    )));
    assert!(!client.is_follow_pending(&uid("bob")));
    assert!(client.is_following(&uid("bob")));

    // Ground truth replaced the cached list wholesale.
    assert_eq!(client.following_list(), &[uid("bob"), uid("dave")]);
    assert!(server.graph().is_following(&uid("alice"), &uid("bob")).unwrap());
}

#[test]
fn unfollow_round_trip() {
    let mut server = server();
    let mut client = establish(&mut server, "alice");

    let actions = client.handle(ClientEvent::ToggleFollow { target: uid("bob") }).unwrap();
    pump(&mut server, &mut client, actions);
    assert!(client.is_following(&uid("bob")));

    let actions = client.handle(ClientEvent::ToggleFollow { target: uid("bob") }).unwrap();
    let surfaced = pump(&mut server, &mut client, actions);

    assert!(surfaced.iter().any(|a| matches!(
        a,
        ClientAction::FollowConfirmed { following: false, .. }
    )));
    assert!(!client.is_following(&uid("bob")));
    assert!(client.following_list().is_empty());
    assert!(!server.graph().is_following(&uid("alice"), &uid("bob")).unwrap());
}

#[test]
fn rejected_toggle_reverts_the_projection() {
    let mut server = server();
    let mut client = establish(&mut server, "alice");

    // Self-follow is refused by the graph store; the server answers with a
    // correlated error and the client rolls back.
    let actions = client.handle(ClientEvent::ToggleFollow { target: uid("alice") }).unwrap();
    assert!(client.is_following(&uid("alice")));

    let surfaced = pump(&mut server, &mut client, actions);

    assert!(surfaced.iter().any(|a| matches!(
        a,
        ClientAction::FollowToggleFailed { reverted_to: false, .. }
    )));
    assert!(!client.is_following(&uid("alice")));
    assert!(!client.is_follow_pending(&uid("alice")));

    // The durable graph was never touched.
    assert!(server.graph().following(&uid("alice")).unwrap().is_empty());
}

#[test]
fn message_ack_and_notification_flow() {
    let mut server = server();
    let mut client = establish(&mut server, "alice");

    client
        .handle(ClientEvent::ProfilesLoaded { users: vec![uid("alice"), uid("bob")] })
        .unwrap();
    client.handle(ClientEvent::SelectChat { user: uid("bob") }).unwrap();

    let actions = client.handle(ClientEvent::SendMessage { body: "hi bob".to_string() }).unwrap();
    let surfaced = pump(&mut server, &mut client, actions);

    // Bob is offline, so only the ack comes back; the message is durable.
    assert!(surfaced.iter().any(|a| matches!(a, ClientAction::MessageAcked { .. })));
    assert!(!surfaced.iter().any(|a| matches!(a, ClientAction::NotificationReceived(_))));

    let stored = server.messages().conversation(&uid("alice"), &uid("bob")).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body, "hi bob");
}
