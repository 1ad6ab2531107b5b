//! Environment abstraction over time and randomness.
//!
//! Session and driver logic never touch the system clock or the OS RNG
//! directly. Everything flows through [`Environment`], so the same code runs
//! against real resources in production and against a virtual clock with a
//! seeded RNG in simulation.

use std::{future::Future, ops::Sub, time::Duration};

/// Source of time, sleep, and random bytes.
///
/// Implementations must keep `now()` monotonic within one execution context,
/// and production implementations must back `random_bytes()` with a
/// cryptographic RNG because session ids come out of it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type produced by this environment.
    ///
    /// `std::time::Instant` in production; simulated clocks (like
    /// `tokio::time::Instant` under turmoil) in tests. Only ordering and
    /// subtraction are required, which is what timeout checks need.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Sleep for `duration`.
    ///
    /// The one async method in the trait. State machines never call it;
    /// only runtime glue (tick loops) does.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// Deterministic environments must produce the same stream for the same
    /// seed.
    fn random_bytes(&self, dest: &mut [u8]);

    /// Draw a random `u64`, e.g. for a session id.
    fn random_u64(&self) -> u64 {
        let mut raw = [0u8; 8];
        self.random_bytes(&mut raw);
        u64::from_be_bytes(raw)
    }
}
