//! Deterministic environment for simulation.
//!
//! `SimEnv` pairs the tokio virtual clock (which turmoil drives forward
//! deterministically) with a seeded ChaCha RNG, so a failing run replays
//! byte-for-byte from its seed.

#![allow(clippy::disallowed_types, reason = "Synchronous RNG locking only")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use vibe_core::env::Environment;

/// Default seed for tests that don't care about the specific value.
const DEFAULT_SEED: u64 = 0x5641_4942;

/// Deterministic simulation environment.
///
/// Clones share the RNG stream, matching production where every component
/// draws from the same entropy source.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Create a simulation environment with the default seed.
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create a simulation environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    /// # Panics
    ///
    /// Panics if the RNG mutex is poisoned. Acceptable in test code.
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}
