//! Production Environment implementation using system time and RNG.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// This implementation:
/// - Uses `SystemTime::now()` for timestamps
/// - Uses `tokio::time::sleep()` for async sleeping
/// - Uses `getrandom` for cryptographic randomness
///
/// # Security
///
/// If `getrandom` fails the buffer is filled from `rand::thread_rng()`, a
/// CSPRNG seeded from the OS, rather than left predictable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            tracing::error!("getrandom failed, using thread RNG: {}", e);
            rand::thread_rng().fill_bytes(buffer);
        }
    }
}
