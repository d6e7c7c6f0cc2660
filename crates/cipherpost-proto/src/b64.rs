//! Base64 helpers and serde adapters for binary fields.
//!
//! All binary values on the wire (`pubkey`, `sender_pub`, `blob`, `key_blob`)
//! use standard padded base64.

use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Serde adapter for `Vec<u8>` fields.
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialize as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    /// Deserialize from a base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode(&text).map_err(D::Error::custom)
    }
}

/// Serde adapter for [`PublicKey`](cipherpost_crypto::PublicKey) fields.
pub mod public_key {
    use cipherpost_crypto::PublicKey;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialize as a base64 string.
    pub fn serialize<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(key.as_bytes()))
    }

    /// Deserialize from a base64 string of exactly 32 bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = super::decode(&text).map_err(D::Error::custom)?;
        PublicKey::from_bytes(&raw).map_err(D::Error::custom)
    }
}

/// Serde adapter for `Option<PublicKey>` fields.
pub mod option_public_key {
    use cipherpost_crypto::PublicKey;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialize as a base64 string or `null`.
    pub fn serialize<S: Serializer>(
        key: &Option<PublicKey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_str(&super::encode(key.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from an optional base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PublicKey>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let raw = super::decode(&text).map_err(D::Error::custom)?;
        PublicKey::from_bytes(&raw).map(Some).map_err(D::Error::custom)
    }
}
