//! Chaotic store wrapper for fault injection testing
//!
//! Store wrapper that randomly fails operations to test error handling and
//! recovery. Used for chaos testing to ensure the driver reports store
//! failures to clients instead of wedging sessions.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use vibe_proto::UserId;

use super::{MessageStore, SocialGraphStore, StoreError, StoredMessage};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but randomly fails operations based on a
/// configured failure rate. Implements both store traits when the inner
/// store does, so one wrapper covers the social graph and message history.
/// Uses Arc<Mutex<>> for the RNG state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStore<S> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter for performance testing
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic
/// randomness. This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    /// Check if we should fail (returns true with probability = `failure_rate`)
    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S> ChaoticStore<S> {
    /// Create a new chaotic store wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    ///
    /// Each call to any store method increments this counter.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Record an attempt and roll for failure.
    fn roll(&self) -> Result<(), StoreError> {
        {
            #[allow(clippy::expect_used)]
            let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
            *count += 1;
        }

        #[allow(clippy::expect_used)]
        let should_fail =
            self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);

        if should_fail {
            Err(StoreError::Io("chaotic failure injection".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<S: SocialGraphStore> SocialGraphStore for ChaoticStore<S> {
    fn toggle_follow(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        self.roll()?;
        self.inner.toggle_follow(actor, target)
    }

    fn is_following(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        self.roll()?;
        self.inner.is_following(actor, target)
    }

    fn following(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.roll()?;
        self.inner.following(user)
    }
}

impl<S: MessageStore> MessageStore for ChaoticStore<S> {
    fn append(&self, sender: &UserId, recipient: &UserId, body: &str) -> Result<u64, StoreError> {
        self.roll()?;
        self.inner.append(sender, recipient, body)
    }

    fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        self.roll()?;
        self.inner.conversation(a, b)
    }

    fn latest_message_id(&self) -> Result<Option<u64>, StoreError> {
        self.roll()?;
        self.inner.latest_message_id()
    }
}
