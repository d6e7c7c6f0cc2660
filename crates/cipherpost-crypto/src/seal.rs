//! XChaCha20-Poly1305 sealing with self-contained `nonce || ciphertext` output.
//!
//! Pairwise and group sealing share one construction and differ only in where
//! the key comes from: a derived [`SharedSecret`] or a distributed
//! [`GroupKey`]. Both draw a fresh random nonce on every call; 192-bit nonces
//! make random generation safe for any realistic message volume.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};

use crate::{
    CryptoError, Result,
    keys::{GroupKey, KEY_SIZE, SharedSecret},
};

/// Size of the nonce prefix in bytes (192 bits for XChaCha20).
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Shortest well-formed sealed payload (empty plaintext).
pub const MIN_SEALED_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Seal `plaintext` for the peer that shares `secret`.
///
/// Returns `nonce || ciphertext || tag`.
pub fn seal_pairwise(secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
    seal(secret.as_bytes(), plaintext)
}

/// Open a payload produced by [`seal_pairwise`].
///
/// # Errors
///
/// - `CryptoError::Malformed` if the payload is shorter than nonce + tag
/// - `CryptoError::Authentication` on any corruption or wrong secret
pub fn open_pairwise(secret: &SharedSecret, sealed: &[u8]) -> Result<Vec<u8>> {
    open(secret.as_bytes(), sealed)
}

/// Seal `plaintext` under a group key.
///
/// Returns `nonce || ciphertext || tag`.
pub fn seal_symmetric(key: &GroupKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    seal(key.as_bytes(), plaintext)
}

/// Open a payload produced by [`seal_symmetric`].
///
/// # Errors
///
/// Same contract as [`open_pairwise`].
pub fn open_symmetric(key: &GroupKey, sealed: &[u8]) -> Result<Vec<u8>> {
    open(key.as_bytes(), sealed)
}

fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(CryptoError::Malformed { len: sealed.len(), min: MIN_SEALED_SIZE });
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(key.into());
    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Authentication)
}
