//! Mailbox entries and the envelopes carried inside private blobs.

use cipherpost_crypto::{MIN_SEALED_SIZE, PublicKey};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, b64};

/// What a mailbox stores and `fetch_blobs` returns.
///
/// Tagged so the relay can fan group messages out, and so the client can
/// dispatch without probing fields. The relay never looks inside `blob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailboxEntry {
    /// Pairwise traffic: base64 of a JSON [`DirectEnvelope`].
    Private {
        /// Sender identity as claimed on `send_blob`.
        from: String,
        /// Opaque base64 payload.
        blob: String,
    },

    /// Group traffic: base64 of `nonce || ciphertext` under the group key.
    Group {
        /// Group the message was sent to.
        group_id: String,
        /// Sender identity (verified member at send time).
        from: String,
        /// Opaque base64 payload.
        blob: String,
    },
}

impl MailboxEntry {
    /// Sender identity.
    pub fn from(&self) -> &str {
        match self {
            Self::Private { from, .. } | Self::Group { from, .. } => from,
        }
    }

    /// Size of the opaque payload, for logging.
    pub fn blob_len(&self) -> usize {
        match self {
            Self::Private { blob, .. } | Self::Group { blob, .. } => blob.len(),
        }
    }

    /// Bytes this entry adds to a fetch response, separator included.
    ///
    /// Compare against [`MAX_BATCH_BYTES`](crate::MAX_BATCH_BYTES).
    pub fn batch_cost(&self) -> usize {
        crate::codec::encoded_len(self).map_or(usize::MAX, |len| len.saturating_add(1))
    }
}

/// Envelope inside a private blob, sealed end to end.
///
/// Both variants carry the sender's public key so the recipient can derive
/// the pairwise secret without another directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectEnvelope {
    /// Pairwise-sealed text message.
    Message {
        /// Sender's X25519 public key.
        #[serde(with = "crate::b64::public_key")]
        sender_pub: PublicKey,
        /// `nonce || ciphertext` under the pairwise secret.
        #[serde(with = "crate::b64::bytes")]
        blob: Vec<u8>,
    },

    /// Pairwise-sealed group key for one member.
    GroupKeyDistribution {
        /// Group the key belongs to.
        group_id: String,
        /// Group creator's X25519 public key.
        #[serde(with = "crate::b64::public_key")]
        sender_pub: PublicKey,
        /// `nonce || ciphertext` wrapping the 32-byte group key.
        #[serde(with = "crate::b64::bytes")]
        key_blob: Vec<u8>,
    },
}

impl DirectEnvelope {
    /// Public key the recipient pairs with to open the payload.
    pub fn sender_pub(&self) -> &PublicKey {
        match self {
            Self::Message { sender_pub, .. } | Self::GroupKeyDistribution { sender_pub, .. } => {
                sender_pub
            },
        }
    }

    /// The sealed payload.
    pub fn sealed(&self) -> &[u8] {
        match self {
            Self::Message { blob, .. } => blob,
            Self::GroupKeyDistribution { key_blob, .. } => key_blob,
        }
    }

    /// Encode as the opaque `blob` string of a `send_blob` request.
    pub fn to_blob(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(b64::encode(&json))
    }

    /// Decode the `blob` of a private mailbox entry.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEnvelope` if the blob is not base64 JSON of a known
    /// envelope, or if the sealed payload is shorter than nonce + tag.
    pub fn from_blob(blob: &str) -> Result<Self, ProtocolError> {
        let json = b64::decode(blob).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
        let envelope: Self = serde_json::from_slice(&json)
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

        check_sealed_len(envelope.sealed().len())?;
        Ok(envelope)
    }
}

/// Encode a sealed group payload as a `send_group_blob` blob.
pub fn encode_sealed(sealed: &[u8]) -> String {
    b64::encode(sealed)
}

/// Decode a group blob back into `nonce || ciphertext`.
///
/// # Errors
///
/// Returns `MalformedEnvelope` on bad base64 or a payload shorter than
/// nonce + tag.
pub fn decode_sealed(blob: &str) -> Result<Vec<u8>, ProtocolError> {
    let sealed = b64::decode(blob).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
    check_sealed_len(sealed.len())?;
    Ok(sealed)
}

fn check_sealed_len(len: usize) -> Result<(), ProtocolError> {
    if len < MIN_SEALED_SIZE {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "sealed payload is {len} bytes, need at least {MIN_SEALED_SIZE}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_key() -> PublicKey {
        PublicKey::from([5u8; 32])
    }

    #[test]
    fn private_entry_wire_shape() {
        let entry = MailboxEntry::Private { from: "alice".to_string(), blob: "QUJD".to_string() };
        let json = serde_json::to_string(&entry).unwrap();

        assert_eq!(json, r#"{"type":"private","from":"alice","blob":"QUJD"}"#);
    }

    #[test]
    fn group_entry_wire_shape() {
        let entry = MailboxEntry::Group {
            group_id: "g1".to_string(),
            from: "alice".to_string(),
            blob: "QUJD".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["type"], "group");
        assert_eq!(json["group_id"], "g1");
        assert_eq!(entry.from(), "alice");
        assert_eq!(entry.blob_len(), 4);
    }

    #[test]
    fn key_distribution_survives_blob_encoding() {
        let envelope = DirectEnvelope::GroupKeyDistribution {
            group_id: "g1".to_string(),
            sender_pub: sample_key(),
            key_blob: vec![1u8; MIN_SEALED_SIZE + 32],
        };

        let blob = envelope.to_blob().unwrap();
        let decoded = DirectEnvelope::from_blob(&blob).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.sender_pub(), &sample_key());
    }

    #[test]
    fn key_distribution_json_is_tagged() {
        let envelope = DirectEnvelope::GroupKeyDistribution {
            group_id: "g1".to_string(),
            sender_pub: sample_key(),
            key_blob: vec![1u8; MIN_SEALED_SIZE],
        };
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "group_key_distribution");
        assert!(json["key_blob"].is_string());
    }

    #[test]
    fn short_sealed_payload_is_malformed() {
        let envelope = DirectEnvelope::Message { sender_pub: sample_key(), blob: vec![0u8; 10] };
        let blob = envelope.to_blob().unwrap();

        assert!(matches!(
            DirectEnvelope::from_blob(&blob),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn non_json_blob_is_malformed() {
        let blob = b64::encode(b"definitely not json");
        assert!(matches!(
            DirectEnvelope::from_blob(&blob),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn group_blob_length_is_checked() {
        assert!(decode_sealed(&encode_sealed(&[0u8; MIN_SEALED_SIZE])).is_ok());
        assert!(decode_sealed(&encode_sealed(&[0u8; MIN_SEALED_SIZE - 1])).is_err());
        assert!(decode_sealed("%%%").is_err());
    }
}
