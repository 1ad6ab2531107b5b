//! Production [`Environment`] backed by the OS.
//!
//! Real monotonic time, tokio sleeps, and getrandom for session ids. None of
//! it is reproducible; deterministic runs use the simulation environment in
//! the harness crate instead.

use std::time::Duration;

use vibe_core::Environment;

/// Environment implementation over system time and the OS RNG.
///
/// Session ids come out of `random_bytes`, so the RNG has to be the
/// cryptographic one: getrandom reads `/dev/urandom` on Linux and the
/// platform equivalent elsewhere.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A server that cannot draw
/// unpredictable session ids must not keep accepting connections.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, dest: &mut [u8]) {
        getrandom::fill(dest).expect("OS RNG failed, session ids would be predictable");
    }
}
