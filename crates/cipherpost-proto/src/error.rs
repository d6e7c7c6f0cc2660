//! Protocol error types.

use thiserror::Error;

/// Errors from decoding or encoding wire messages.
///
/// The `Display` form of each variant is what the relay puts in the `reason`
/// field of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The line was not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// `type` was missing or not a known request.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A required field was absent or empty.
    #[error("{request} requires {required}")]
    MissingFields {
        /// Request type that failed validation.
        request: &'static str,
        /// Human-readable list of required fields.
        required: &'static str,
    },

    /// Fields were present but had the wrong shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Line exceeded the maximum accepted size.
    #[error("line too long: {len} bytes exceeds {max}")]
    LineTooLong {
        /// Observed length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Envelope inside a blob could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Returns true if the peer sent something the protocol cannot accept.
    ///
    /// Such errors are reported to the caller and the stream stays usable.
    pub fn is_peer_error(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}
