//! Client error types.

use std::path::PathBuf;

use cipherpost_crypto::CryptoError;
use cipherpost_proto::ProtocolError;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay could not be reached or the stream broke mid-request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay answered with an error response.
    #[error("relay refused {request}: {reason}")]
    Relay {
        /// Request type that was refused.
        request: &'static str,
        /// `reason` from the response.
        reason: String,
    },

    /// No public key is published for the recipient.
    #[error("no public key published for {0}")]
    PeerNotFound(String),

    /// The envelope's sender key does not match the directory key of `from`.
    #[error("cannot verify sender {from}: {reason}")]
    UnverifiedSender {
        /// Claimed sender.
        from: String,
        /// Why verification failed.
        reason: String,
    },

    /// A key distribution arrived for a group whose key is already held.
    #[error("conflicting key for group {group_id} from {from}")]
    GroupKeyConflict {
        /// Group the distribution names.
        group_id: String,
        /// Sender of the distribution.
        from: String,
    },

    /// No group key is held locally for this group.
    #[error("no key held for group {0}")]
    UnknownGroup(String),

    /// Sealing, opening or key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A wire message or envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local key or state file could not be read or written.
    #[error("storage error at {path}: {reason}")]
    Storage {
        /// File involved.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Client is in an invalid state for the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Only transport failures qualify; the poll loop retries them on its
    /// next tick. Everything else needs a different input or a fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True when the ciphertext itself was rejected: altered, truncated or
    /// sealed under another key.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Crypto(err) if err.is_payload_error())
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Storage { path: path.into(), reason: reason.to_string() }
    }
}
