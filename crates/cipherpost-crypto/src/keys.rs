//! Client identities, pairwise key agreement and group keys.
//!
//! A client's identity is a long-lived X25519 key pair. Two clients that know
//! each other's public keys derive the same [`SharedSecret`] without any
//! message exchange; the relay only ever sees the public halves.

use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, Result};

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of every symmetric key (pairwise secret, group key) in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF info prefix for pairwise secrets (domain separation).
const PAIRWISE_LABEL: &[u8] = b"cipherpost pairwise v1";

/// X25519 public key as published to the key directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: PUBLIC_KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(arr))
    }

    /// Get the key as bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Long-lived X25519 identity.
///
/// The secret half is zeroized on drop by `x25519-dalek`.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh identity from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_static(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore an identity from its 32 secret bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() });
        }
        let mut arr = Zeroizing::new([0u8; KEY_SIZE]);
        arr.copy_from_slice(bytes);
        Ok(Self::from_static(StaticSecret::from(*arr)))
    }

    fn from_static(secret: StaticSecret) -> Self {
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// The public half, suitable for publishing.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Secret bytes for persistence.
    ///
    /// # Security
    ///
    /// Handle with care - this exposes the private key. The returned buffer
    /// is wiped when dropped.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Symmetric secret shared by exactly two identities.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; KEY_SIZE],
}

impl SharedSecret {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// Derive the pairwise secret between `my_keys` and `their_pub`.
///
/// Commutative: `derive(a, B) == derive(b, A)`. The raw X25519 output is run
/// through HKDF-SHA256 together with both public keys (sorted, so either side
/// builds the same info string).
///
/// # Errors
///
/// Returns `CryptoError::NonContributory` if the peer key is a low-order
/// point that forces an all-zero agreement.
pub fn derive_pairwise_key(my_keys: &KeyPair, their_pub: &PublicKey) -> Result<SharedSecret> {
    let peer = x25519_dalek::PublicKey::from(their_pub.0);
    let agreed = my_keys.secret.diffie_hellman(&peer);
    if !agreed.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let (low, high) = if my_keys.public <= *their_pub {
        (my_keys.public, *their_pub)
    } else {
        (*their_pub, my_keys.public)
    };
    let mut info = Vec::with_capacity(PAIRWISE_LABEL.len() + 2 * PUBLIC_KEY_SIZE);
    info.extend_from_slice(PAIRWISE_LABEL);
    info.extend_from_slice(low.as_bytes());
    info.extend_from_slice(high.as_bytes());

    let hk = Hkdf::<Sha256>::new(None, agreed.as_bytes());
    let mut secret = SharedSecret { bytes: [0u8; KEY_SIZE] };
    hk.expand(&info, &mut secret.bytes).map_err(|_| CryptoError::KeyDerivation)?;

    Ok(secret)
}

/// Symmetric key shared by every member of a group.
///
/// Generated by the group creator and delivered to each member sealed under
/// their pairwise secret. The relay only ever sees it in sealed form.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey {
    bytes: [u8; KEY_SIZE],
}

impl GroupKey {
    /// Generate a new random group key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        let key = Self { bytes };
        bytes.zeroize();
        key
    }

    /// Create a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self { bytes: arr })
    }

    /// Get the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this - avoid logging the returned bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupKey([REDACTED])")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_secret_is_commutative() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let ab = derive_pairwise_key(&alice, &bob.public_key()).unwrap();
        let ba = derive_pairwise_key(&bob, &alice.public_key()).unwrap();

        assert_eq!(ab, ba);
    }

    #[test]
    fn pairwise_secret_differs_per_peer() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();

        let ab = derive_pairwise_key(&alice, &bob.public_key()).unwrap();
        let ac = derive_pairwise_key(&alice, &carol.public_key()).unwrap();

        assert_ne!(ab, ac);
    }

    #[test]
    fn low_order_peer_key_is_rejected() {
        let alice = KeyPair::generate();
        let zero = PublicKey::from([0u8; PUBLIC_KEY_SIZE]);

        let result = derive_pairwise_key(&alice, &zero);
        assert_eq!(result, Err(CryptoError::NonContributory));
    }

    #[test]
    fn secret_bytes_restore_same_identity() {
        let original = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(original.secret_bytes().as_ref()).unwrap();

        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn wrong_length_secret_is_rejected() {
        let result = KeyPair::from_secret_bytes(&[7u8; 31]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn public_key_from_bytes_checks_length() {
        assert!(PublicKey::from_bytes(&[1u8; 32]).is_ok());
        assert!(PublicKey::from_bytes(&[1u8; 33]).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let key = GroupKey::from_bytes(&[0xAB; KEY_SIZE]).unwrap();
        assert_eq!(format!("{key:?}"), "GroupKey([REDACTED])");

        let pair = KeyPair::generate();
        let rendered = format!("{pair:?}");
        assert!(rendered.starts_with("KeyPair { public: PublicKey("));
    }

    #[test]
    fn generated_group_keys_differ() {
        assert_ne!(GroupKey::generate(), GroupKey::generate());
    }
}
