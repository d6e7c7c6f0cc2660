//! Crypto error types.

use thiserror::Error;

/// Errors from key handling and envelope sealing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material had the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Sealed payload is too short to hold a nonce and a tag.
    #[error("malformed sealed payload: {len} bytes, need at least {min}")]
    Malformed {
        /// Length of the rejected payload.
        len: usize,
        /// Minimum valid length.
        min: usize,
    },

    /// Tag verification failed: tampered data or the wrong key.
    #[error("authentication failed")]
    Authentication,

    /// Key agreement produced an all-zero secret (low-order peer key).
    #[error("peer public key is not contributory")]
    NonContributory,

    /// HKDF refused the requested output length.
    #[error("key derivation failed")]
    KeyDerivation,

    /// Sealing failed inside the AEAD.
    #[error("encryption failed")]
    Encryption,
}

impl CryptoError {
    /// Returns true if the error means "this particular payload is unusable".
    ///
    /// Such errors are isolated to one envelope and never abort a batch.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::Authentication)
    }
}
