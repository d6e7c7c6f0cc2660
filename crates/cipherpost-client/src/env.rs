//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (wall-clock time, sleeping, randomness). Tests substitute a fixed clock;
//! production uses [`SystemEnv`](crate::SystemEnv).
//!
//! # Invariants
//!
//! - Timestamps are Unix milliseconds, used only to stamp history entries
//! - `random_bytes()` is cryptographically secure in production; group keys
//!   are drawn from it

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in Unix milliseconds.
    fn now_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Used only by the poll loop, never by message handling.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use OS entropy or a CSPRNG seeded
    /// from it.
    fn random_bytes(&self, buffer: &mut [u8]);
}
