//! Cipherpost Cryptographic Primitives
//!
//! Everything a client needs to turn plaintext into a self-contained envelope
//! payload and back. The relay never links against this crate's secret-key
//! paths; it only handles the opaque bytes these functions produce.
//!
//! # Scheme
//!
//! - Identity: X25519 key pair per client
//! - Pairwise: X25519 agreement, then HKDF-SHA256 into a 32-byte secret
//! - Sealing: XChaCha20-Poly1305, fresh 24-byte random nonce per call
//!
//! Every sealed payload has the same wire shape:
//!
//! ```text
//! nonce (24 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! so no envelope ever depends on nonce state stored elsewhere.
//!
//! # Security Properties
//!
//! - Nonces are drawn from the OS CSPRNG on every seal, never from a counter
//! - Opening fails closed: a bad tag, a wrong key or a truncated blob yields
//!   an error and no plaintext
//! - Secret material is zeroized on drop and redacted from `Debug`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod keys;
pub mod seal;

pub use error::CryptoError;
pub use keys::{
    GroupKey, KEY_SIZE, KeyPair, PUBLIC_KEY_SIZE, PublicKey, SharedSecret, derive_pairwise_key,
};
pub use seal::{
    MIN_SEALED_SIZE, NONCE_SIZE, TAG_SIZE, open_pairwise, open_symmetric, seal_pairwise,
    seal_symmetric,
};

/// Result alias for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
