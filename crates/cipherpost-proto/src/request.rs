//! Client-to-relay requests.

use cipherpost_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// One request line, decoded once at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Upsert the caller's public key.
    PublishKey {
        /// Identity being published.
        client_id: String,
        /// X25519 public key.
        #[serde(with = "crate::b64::public_key")]
        pubkey: PublicKey,
    },

    /// Look up a published key.
    GetKey {
        /// Identity to look up.
        client_id: String,
    },

    /// Deposit a private envelope in `to`'s mailbox.
    SendBlob {
        /// Recipient identity.
        to: String,
        /// Sender identity.
        from: String,
        /// Opaque base64 payload.
        blob: String,
    },

    /// Register a new group.
    CreateGroup {
        /// Group identity.
        group_id: String,
        /// Initial members.
        members: Vec<String>,
        /// Creator.
        admin: String,
    },

    /// Fan a group message out to every other member.
    SendGroupBlob {
        /// Target group.
        group_id: String,
        /// Sender identity (must be a member).
        from: String,
        /// Opaque base64 payload.
        blob: String,
    },

    /// Drain the caller's mailbox.
    FetchBlobs {
        /// Mailbox owner.
        client_id: String,
    },

    /// List known clients (except the caller) and groups.
    ListAll {
        /// Caller, excluded from the client list.
        #[serde(default)]
        client_id: String,
    },

    /// Drop the caller from the active-session set.
    Disconnect {
        /// Caller.
        #[serde(default)]
        client_id: String,
    },
}

/// Request discriminant, for logging and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `publish_key`
    PublishKey,
    /// `get_key`
    GetKey,
    /// `send_blob`
    SendBlob,
    /// `create_group`
    CreateGroup,
    /// `send_group_blob`
    SendGroupBlob,
    /// `fetch_blobs`
    FetchBlobs,
    /// `list_all`
    ListAll,
    /// `disconnect`
    Disconnect,
}

impl RequestKind {
    /// Every request kind, in wire order.
    pub const ALL: [Self; 8] = [
        Self::PublishKey,
        Self::GetKey,
        Self::SendBlob,
        Self::CreateGroup,
        Self::SendGroupBlob,
        Self::FetchBlobs,
        Self::ListAll,
        Self::Disconnect,
    ];

    /// Wire name carried in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PublishKey => "publish_key",
            Self::GetKey => "get_key",
            Self::SendBlob => "send_blob",
            Self::CreateGroup => "create_group",
            Self::SendGroupBlob => "send_group_blob",
            Self::FetchBlobs => "fetch_blobs",
            Self::ListAll => "list_all",
            Self::Disconnect => "disconnect",
        }
    }

    /// Parse a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Fields that must be present and non-empty.
    fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::PublishKey => &["client_id", "pubkey"],
            Self::GetKey | Self::FetchBlobs => &["client_id"],
            Self::SendBlob => &["to", "from", "blob"],
            Self::CreateGroup => &["group_id", "members", "admin"],
            Self::SendGroupBlob => &["group_id", "from", "blob"],
            Self::ListAll | Self::Disconnect => &[],
        }
    }

    fn required_description(self) -> &'static str {
        match self {
            Self::PublishKey => "client_id and pubkey",
            Self::GetKey | Self::FetchBlobs => "client_id",
            Self::SendBlob => "to, from and blob",
            Self::CreateGroup => "group_id, members and admin",
            Self::SendGroupBlob => "group_id, from and blob",
            Self::ListAll | Self::Disconnect => "nothing",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Request {
    /// Discriminant of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::PublishKey { .. } => RequestKind::PublishKey,
            Self::GetKey { .. } => RequestKind::GetKey,
            Self::SendBlob { .. } => RequestKind::SendBlob,
            Self::CreateGroup { .. } => RequestKind::CreateGroup,
            Self::SendGroupBlob { .. } => RequestKind::SendGroupBlob,
            Self::FetchBlobs { .. } => RequestKind::FetchBlobs,
            Self::ListAll { .. } => RequestKind::ListAll,
            Self::Disconnect { .. } => RequestKind::Disconnect,
        }
    }
}

/// Decode and validate one request line.
///
/// # Errors
///
/// In order of precedence:
/// - `InvalidJson` if the line is not a JSON object
/// - `UnknownType` if `type` is missing or unrecognised
/// - `MissingFields` if a required field is absent, `null` or empty
/// - `InvalidRequest` if a field has the wrong shape (e.g. a bad public key)
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::InvalidJson("expected a JSON object".to_string()));
    }

    let kind = match value.get("type") {
        Some(Value::String(name)) => {
            RequestKind::from_wire(name).ok_or_else(|| ProtocolError::UnknownType(name.clone()))?
        },
        Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
        None => return Err(ProtocolError::UnknownType("<missing>".to_string())),
    };

    let complete = kind.required_fields().iter().all(|field| match value.get(*field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    });
    if !complete {
        return Err(ProtocolError::MissingFields {
            request: kind.as_str(),
            required: kind.required_description(),
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRequest(e.to_string()))
}
