//! Property-based tests for the connection registry and presence tracker.
//!
//! These verify invariants that must hold for all register/unregister
//! sequences: session uniqueness, identity-level transition edges, and
//! sorted deduplicated snapshots.

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use vibe_proto::UserId;
use vibe_server::{ConnectionRegistry, PresenceTracker, PresenceTransition};

/// A randomized registry operation.
#[derive(Debug, Clone)]
enum Op {
    Register { session_id: u64, user: u8 },
    Unregister { session_id: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..32, 0u8..6).prop_map(|(session_id, user)| Op::Register { session_id, user }),
        (1u64..32).prop_map(|session_id| Op::Unregister { session_id }),
    ]
}

fn user(n: u8) -> UserId {
    UserId::new(format!("user-{n}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the registry's online set always equals the reference model
    /// (set of users with at least one live session), no matter the
    /// operation order.
    #[test]
    fn prop_online_set_matches_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut registry = ConnectionRegistry::new();
        let mut model: HashMap<u64, UserId> = HashMap::new();

        for op in ops {
            match op {
                Op::Register { session_id, user: u } => {
                    if model.contains_key(&session_id) {
                        continue;
                    }
                    registry.register_session(session_id, user(u));
                    model.insert(session_id, user(u));
                },
                Op::Unregister { session_id } => {
                    registry.unregister_session(session_id);
                    model.remove(&session_id);
                },
            }

            let expected: BTreeSet<UserId> = model.values().cloned().collect();
            let actual: BTreeSet<UserId> = registry.online_users().cloned().collect();
            prop_assert_eq!(actual, expected);
        }
    }

    /// Property: CameOnline fires exactly when a user's first session
    /// registers, WentOffline exactly when the last one unregisters.
    #[test]
    fn prop_transitions_fire_on_identity_edges(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut registry = ConnectionRegistry::new();
        let mut model: HashMap<u64, UserId> = HashMap::new();

        for op in ops {
            match op {
                Op::Register { session_id, user: u } => {
                    if model.contains_key(&session_id) {
                        continue;
                    }
                    let was_online = model.values().any(|v| *v == user(u));
                    let transition = registry.register_session(session_id, user(u));
                    model.insert(session_id, user(u));

                    if was_online {
                        prop_assert_eq!(transition, Some(PresenceTransition::NoChange));
                    } else {
                        prop_assert_eq!(transition, Some(PresenceTransition::CameOnline(user(u))));
                    }
                },
                Op::Unregister { session_id } => {
                    let removed = registry.unregister_session(session_id);
                    let expected_user = model.remove(&session_id);

                    match expected_user {
                        None => prop_assert!(removed.is_none()),
                        Some(u) => {
                            let still_online = model.values().any(|v| *v == u);
                            let (reported, transition) =
                                removed.expect("registered session must unregister");
                            prop_assert_eq!(&reported, &u);
                            if still_online {
                                prop_assert_eq!(transition, PresenceTransition::NoChange);
                            } else {
                                prop_assert_eq!(transition, PresenceTransition::WentOffline(u));
                            }
                        },
                    }
                },
            }
        }
    }

    /// Property: the presence snapshot is always sorted, deduplicated, and
    /// updated only on identity-level transitions.
    #[test]
    fn prop_snapshot_sorted_and_only_changes_on_edges(
        ops in prop::collection::vec(op_strategy(), 1..60)
    ) {
        let mut registry = ConnectionRegistry::new();
        let mut presence = PresenceTracker::new();
        let mut model: HashMap<u64, UserId> = HashMap::new();

        for op in ops {
            let update = match op {
                Op::Register { session_id, user: u } => {
                    if model.contains_key(&session_id) {
                        continue;
                    }
                    let transition = registry
                        .register_session(session_id, user(u))
                        .expect("fresh session id");
                    model.insert(session_id, user(u));
                    presence.apply(&transition)
                },
                Op::Unregister { session_id } => {
                    match registry.unregister_session(session_id) {
                        None => None,
                        Some((_, transition)) => {
                            model.remove(&session_id);
                            presence.apply(&transition)
                        },
                    }
                },
            };

            if let Some(update) = update {
                // Sorted and deduplicated.
                let mut sorted = update.online.clone();
                sorted.sort();
                sorted.dedup();
                prop_assert_eq!(&sorted, &update.online);

                // Matches the model at the moment of the change.
                let expected: Vec<UserId> = {
                    let set: BTreeSet<UserId> = model.values().cloned().collect();
                    set.into_iter().collect()
                };
                prop_assert_eq!(update.online, expected);
            }

            prop_assert_eq!(registry.online_count(), presence.online_count());
        }
    }
}
