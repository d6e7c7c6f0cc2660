//! Relay-to-client responses.

use cipherpost_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::MailboxEntry;

/// Error reasons the client matches on.
pub mod reason {
    /// `get_key` for an unpublished identity.
    pub const NOT_FOUND: &str = "not found";
    /// `create_group` for a taken group id.
    pub const ALREADY_EXISTS: &str = "already exists";
    /// `send_group_blob` for an unknown group.
    pub const GROUP_NOT_FOUND: &str = "group not found";
    /// `send_group_blob` from a non-member.
    pub const NOT_A_MEMBER: &str = "not a member of this group";
    /// `send_blob` or `send_group_blob` whose entry could never be fetched.
    pub const BLOB_TOO_LARGE: &str = "blob too large";
}

/// Outcome discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Request succeeded.
    Ok,
    /// Request failed; see `reason`.
    Error,
}

/// One response line.
///
/// Only the fields relevant to the request are present on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome.
    pub status: Status,
    /// Failure description (error responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Acknowledgement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Identity the response refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Public key (`get_key`).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "crate::b64::option_public_key")]
    pub pubkey: Option<PublicKey>,
    /// Drained mailbox (`fetch_blobs`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MailboxEntry>>,
    /// Known clients (`list_all`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<String>>,
    /// Known groups (`list_all`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl Response {
    /// Bare success.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            reason: None,
            message: None,
            client_id: None,
            pubkey: None,
            messages: None,
            clients: None,
            groups: None,
        }
    }

    /// Success with an acknowledgement message.
    pub fn ack(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Self::ok() }
    }

    /// Failure with a reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self { status: Status::Error, reason: Some(reason.into()), ..Self::ok() }
    }

    /// Attach the identity the response refers to.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Attach a public key.
    #[must_use]
    pub fn with_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.pubkey = Some(pubkey);
        self
    }

    /// Attach a drained mailbox batch.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<MailboxEntry>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Attach a directory listing.
    #[must_use]
    pub fn with_listing(mut self, clients: Vec<String>, groups: Vec<String>) -> Self {
        self.clients = Some(clients);
        self.groups = Some(groups);
        self
    }

    /// True for `status: "ok"`.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Failure reason, if this is an error response.
    pub fn error_reason(&self) -> Option<&str> {
        match self.status {
            Status::Ok => None,
            Status::Error => Some(self.reason.as_deref().unwrap_or("unspecified error")),
        }
    }
}
