//! Cipherpost wire protocol.
//!
//! One JSON object per line in each direction. Requests are a closed enum
//! tagged on `type`; responses carry `status` plus per-request fields.
//!
//! # Layers
//!
//! ```text
//! Request / Response        relay-visible, plaintext metadata only
//!   └─ MailboxEntry         what a mailbox stores and fetch returns
//!        ├─ private blob    base64(JSON DirectEnvelope), opaque to the relay
//!        │    ├─ Message                 pairwise-sealed text
//!        │    └─ GroupKeyDistribution    pairwise-sealed group key
//!        └─ group blob      base64(nonce || ciphertext), opaque to the relay
//! ```
//!
//! The relay decodes [`Request`] and builds [`Response`]/[`MailboxEntry`]. Only
//! clients ever decode a [`DirectEnvelope`] or a sealed group blob.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod b64;
mod codec;
mod envelope;
mod error;
mod request;
mod response;

pub use codec::{MAX_BATCH_BYTES, MAX_LINE_BYTES, decode_response, encode_line, encoded_len};
pub use envelope::{DirectEnvelope, MailboxEntry, decode_sealed, encode_sealed};
pub use error::ProtocolError;
pub use request::{Request, RequestKind, decode_request};
pub use response::{Response, Status, reason};
