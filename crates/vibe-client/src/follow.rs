//! Optimistic follow-toggle reconciliation.
//!
//! The UI flips the follow state the moment the user taps the button, then
//! reconciles against the server's reply. A successful reply carries the
//! ground-truth following list, which replaces the local cache wholesale. A
//! failed reply (or a timeout) rolls the flag back to its pre-toggle value.

use std::collections::HashMap;
use std::ops::Sub;
use std::time::Duration;

use vibe_proto::UserId;

use crate::error::ClientError;

/// How long a toggle may sit unconfirmed before it is rolled back.
pub const PENDING_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-target follow state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FollowState {
    /// Matches the last server-confirmed value.
    Confirmed(bool),
    /// Optimistically flipped, awaiting the server's verdict.
    Pending {
        /// The optimistic (displayed) value.
        value: bool,
        /// The confirmed value to revert to on failure.
        previous: bool,
    },
}

/// Tracks follow flags per target and the confirmed following list.
#[derive(Debug)]
pub struct FollowCoordinator<I> {
    states: HashMap<UserId, FollowState>,
    pending_since: HashMap<UserId, I>,
    following: Vec<UserId>,
}

impl<I> Default for FollowCoordinator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I> FollowCoordinator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Creates an empty coordinator. All targets start confirmed-unfollowed.
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            pending_since: HashMap::new(),
            following: Vec::new(),
        }
    }

    /// Seeds the confirmed following list, e.g. from a profile fetch.
    pub fn load_following(&mut self, following: Vec<UserId>) {
        self.states.clear();
        self.pending_since.clear();
        for user in &following {
            self.states
                .insert(user.clone(), FollowState::Confirmed(true));
        }
        self.following = following;
    }

    /// Optimistically flips the follow flag for `target`.
    ///
    /// Returns the new displayed value. Fails with [`ClientError::ToggleInFlight`]
    /// if a previous toggle for the same target has not resolved yet.
    pub fn toggle(&mut self, target: UserId, now: I) -> Result<bool, ClientError> {
        let current = match self.states.get(&target) {
            Some(FollowState::Pending { .. }) => {
                return Err(ClientError::ToggleInFlight { target });
            }
            Some(FollowState::Confirmed(value)) => *value,
            None => false,
        };
        let flipped = !current;
        self.states.insert(
            target.clone(),
            FollowState::Pending {
                value: flipped,
                previous: current,
            },
        );
        self.pending_since.insert(target, now);
        Ok(flipped)
    }

    /// Applies the server's verdict for a successful toggle.
    ///
    /// The reply's `following` flag and list are ground truth and replace
    /// whatever was displayed, even if they disagree with the optimistic value.
    pub fn confirm(&mut self, target: &UserId, following: bool, following_list: Vec<UserId>) {
        self.states
            .insert(target.clone(), FollowState::Confirmed(following));
        self.pending_since.remove(target);
        self.following = following_list;
    }

    /// Rolls a pending toggle back to its pre-toggle value.
    ///
    /// Returns the reverted-to value, or `None` if no toggle was pending for
    /// `target` (a late failure after the timeout already fired).
    pub fn fail(&mut self, target: &UserId) -> Option<bool> {
        self.pending_since.remove(target);
        match self.states.get(target) {
            Some(FollowState::Pending { previous, .. }) => {
                let previous = *previous;
                self.states
                    .insert(target.clone(), FollowState::Confirmed(previous));
                Some(previous)
            }
            _ => None,
        }
    }

    /// Rolls back every toggle that has been pending longer than
    /// [`PENDING_TIMEOUT`]. Returns the targets that were reverted, with the
    /// value each reverted to.
    pub fn tick(&mut self, now: I) -> Vec<(UserId, bool)> {
        let expired: Vec<UserId> = self
            .pending_since
            .iter()
            .filter(|(_, since)| now >= **since && now - **since >= PENDING_TIMEOUT)
            .map(|(target, _)| target.clone())
            .collect();
        let mut reverted = Vec::with_capacity(expired.len());
        for target in expired {
            if let Some(previous) = self.fail(&target) {
                reverted.push((target, previous));
            }
        }
        reverted.sort_by(|a, b| a.0.cmp(&b.0));
        reverted
    }

    /// The displayed follow flag for `target`.
    pub fn is_following(&self, target: &UserId) -> bool {
        match self.states.get(target) {
            Some(FollowState::Confirmed(value)) => *value,
            Some(FollowState::Pending { value, .. }) => *value,
            None => false,
        }
    }

    /// Whether a toggle for `target` is awaiting confirmation.
    pub fn is_pending(&self, target: &UserId) -> bool {
        matches!(self.states.get(target), Some(FollowState::Pending { .. }))
    }

    /// The last server-confirmed following list.
    pub fn following_list(&self) -> &[UserId] {
        &self.following
    }
}


#[cfg(test)]
mod properties {
    use std::collections::HashMap;
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;

    const TARGETS: u8 = 4;

    fn user(index: u8) -> UserId {
        UserId::new(format!("user-{index}"))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Toggle(u8),
        Confirm(u8, bool),
        Fail(u8),
        Expire,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..TARGETS).prop_map(Op::Toggle),
            (0..TARGETS, any::<bool>()).prop_map(|(t, v)| Op::Confirm(t, v)),
            (0..TARGETS).prop_map(Op::Fail),
            Just(Op::Expire),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The displayed flag always equals the pending value if a toggle is
        /// in flight, and the last confirmed value otherwise.
        #[test]
        fn prop_displayed_flag_tracks_the_model(
            ops in proptest::collection::vec(op_strategy(), 1..64)
        ) {
            let mut follow = FollowCoordinator::new();
            let mut confirmed: HashMap<UserId, bool> = HashMap::new();
            let mut pending: HashMap<UserId, bool> = HashMap::new();
            let mut now = Instant::now();

            for op in ops {
                match op {
                    Op::Toggle(t) => {
                        let target = user(t);
                        let result = follow.toggle(target.clone(), now);
                        if pending.contains_key(&target) {
                            let in_flight =
                                matches!(result, Err(ClientError::ToggleInFlight { .. }));
                            prop_assert!(in_flight);
                        } else {
                            let previous = confirmed.get(&target).copied().unwrap_or(false);
                            prop_assert_eq!(result.unwrap(), !previous);
                            pending.insert(target, !previous);
                        }
                    }
                    Op::Confirm(t, value) => {
                        let target = user(t);
                        follow.confirm(&target, value, vec![]);
                        pending.remove(&target);
                        confirmed.insert(target, value);
                    }
                    Op::Fail(t) => {
                        let target = user(t);
                        let reverted = follow.fail(&target);
                        if pending.remove(&target).is_some() {
                            let expected = confirmed.get(&target).copied().unwrap_or(false);
                            prop_assert_eq!(reverted, Some(expected));
                        } else {
                            prop_assert_eq!(reverted, None);
                        }
                    }
                    Op::Expire => {
                        now += PENDING_TIMEOUT;
                        let reverted = follow.tick(now);
                        prop_assert_eq!(reverted.len(), pending.len());
                        pending.clear();
                    }
                }

                for t in 0..TARGETS {
                    let target = user(t);
                    let expected = pending
                        .get(&target)
                        .or_else(|| confirmed.get(&target))
                        .copied()
                        .unwrap_or(false);
                    prop_assert_eq!(follow.is_following(&target), expected);
                    prop_assert_eq!(follow.is_pending(&target), pending.contains_key(&target));
                }
            }
        }
    }
}
