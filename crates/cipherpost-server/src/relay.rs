//! Relay Service
//!
//! Turns one decoded request into one response against the shared stores.
//!
//! ## Responsibilities
//!
//! - Directory: upsert and look up public keys
//! - Groups: register groups, authorize group senders
//! - Mailbox: deposit private envelopes, fan group envelopes out, drain on fetch
//! - Sessions: track the liveness hint
//!
//! ## Design
//!
//! - No per-connection state: every request stands alone, so any number of
//!   connections can share one `RelayService` behind an `Arc`
//! - Opaque payloads: blobs are stored and forwarded as received; nothing here
//!   parses or branches on their contents
//! - Errors are answers: every failure becomes an error response and the
//!   stream stays usable

use cipherpost_proto::{
    MAX_BATCH_BYTES, MailboxEntry, ProtocolError, Request, RequestKind, Response, decode_request,
    reason,
};

use crate::{
    directory::{DirectoryError, KeyDirectory},
    groups::{GroupError, GroupRegistry},
    mailbox::Mailbox,
    registry::SessionRegistry,
    storage::Storage,
};

/// Errors produced while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request line could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Directory lookup or publish failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Group lookup or authorization failed.
    #[error(transparent)]
    Group(#[from] GroupError),

    /// The entry could never fit in a fetch response.
    #[error("blob too large: {len} bytes queued, limit {max}")]
    BlobTooLarge {
        /// Encoded size of the mailbox entry.
        len: usize,
        /// Largest entry a fetch can carry.
        max: usize,
    },
}

impl RelayError {
    /// Text for the `reason` field of the error response.
    pub fn reason(&self) -> String {
        match self {
            Self::Protocol(err) => err.to_string(),
            Self::Directory(DirectoryError::NotFound(_)) => reason::NOT_FOUND.to_string(),
            Self::Directory(DirectoryError::Storage(_)) => "storage unavailable".to_string(),
            Self::Group(GroupError::AlreadyExists(_)) => reason::ALREADY_EXISTS.to_string(),
            Self::Group(GroupError::NotFound(_)) => reason::GROUP_NOT_FOUND.to_string(),
            Self::Group(GroupError::NotMember { .. }) => reason::NOT_A_MEMBER.to_string(),
            Self::BlobTooLarge { .. } => reason::BLOB_TOO_LARGE.to_string(),
        }
    }

    /// True for failures on the relay's side rather than the caller's.
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Protocol(err) => !err.is_peer_error(),
            Self::Directory(DirectoryError::Storage(_)) => true,
            _ => false,
        }
    }
}

/// Response to one line, and whether the stream should end after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response to send back.
    pub response: Response,
    /// True after a successful `disconnect`.
    pub close: bool,
}

/// Shared relay state plus the request handler.
#[derive(Debug)]
pub struct RelayService {
    directory: KeyDirectory,
    groups: GroupRegistry,
    mailbox: Mailbox,
    sessions: SessionRegistry,
}

impl RelayService {
    /// Build a relay over `storage`, loading every persisted key.
    pub fn open(storage: Box<dyn Storage>) -> Result<Self, DirectoryError> {
        Ok(Self {
            directory: KeyDirectory::open(storage)?,
            groups: GroupRegistry::new(),
            mailbox: Mailbox::new(),
            sessions: SessionRegistry::new(),
        })
    }

    /// Key directory.
    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    /// Group registry.
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Mailbox.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Active-session set.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Decode and handle one request line.
    pub fn handle_line(&self, line: &str) -> Reply {
        match decode_request(line) {
            Ok(request) => {
                let kind = request.kind();
                let response = self.handle(request);
                let close = kind == RequestKind::Disconnect && response.is_ok();
                Reply { response, close }
            },
            Err(err) => {
                tracing::debug!(error = %err, "rejected request line");
                Reply { response: Response::error(RelayError::from(err).reason()), close: false }
            },
        }
    }

    /// Handle one decoded request.
    pub fn handle(&self, request: Request) -> Response {
        let kind = request.kind();

        let result = match request {
            Request::PublishKey { client_id, pubkey } => self.publish_key(&client_id, pubkey),
            Request::GetKey { client_id } => self.get_key(&client_id),
            Request::SendBlob { to, from, blob } => self.send_blob(&to, from, blob),
            Request::CreateGroup { group_id, members, admin } => {
                self.create_group(&group_id, members, &admin)
            },
            Request::SendGroupBlob { group_id, from, blob } => {
                self.send_group_blob(group_id, from, blob)
            },
            Request::FetchBlobs { client_id } => Ok(self.fetch_blobs(&client_id)),
            Request::ListAll { client_id } => Ok(self.list_all(&client_id)),
            Request::Disconnect { client_id } => Ok(self.disconnect(&client_id)),
        };

        result.unwrap_or_else(|err| {
            if err.is_internal() {
                tracing::error!(request = %kind, error = %err, "request failed");
            } else {
                tracing::debug!(request = %kind, error = %err, "request refused");
            }
            Response::error(err.reason())
        })
    }

    fn publish_key(
        &self,
        client_id: &str,
        pubkey: cipherpost_crypto::PublicKey,
    ) -> Result<Response, RelayError> {
        self.directory.publish(client_id, pubkey)?;
        self.sessions.register(client_id);

        tracing::info!(client_id, "public key published");
        Ok(Response::ack("key stored").with_client_id(client_id))
    }

    fn get_key(&self, client_id: &str) -> Result<Response, RelayError> {
        let pubkey = self.directory.lookup(client_id)?;
        Ok(Response::ok().with_client_id(client_id).with_pubkey(pubkey))
    }

    fn send_blob(&self, to: &str, from: String, blob: String) -> Result<Response, RelayError> {
        let entry = MailboxEntry::Private { from, blob };
        check_fits(&entry)?;

        tracing::debug!(from = entry.from(), to, bytes = entry.blob_len(), "private blob stored");
        self.mailbox.deposit(to, entry);
        Ok(Response::ack("stored"))
    }

    fn create_group(
        &self,
        group_id: &str,
        members: Vec<String>,
        admin: &str,
    ) -> Result<Response, RelayError> {
        let group = self.groups.create(group_id, members, admin)?;

        tracing::info!(group_id, admin, members = group.members.len(), "group created");
        Ok(Response::ack("group created"))
    }

    fn send_group_blob(
        &self,
        group_id: String,
        from: String,
        blob: String,
    ) -> Result<Response, RelayError> {
        let group = self.groups.authorize_sender(&group_id, &from)?;

        let entry = MailboxEntry::Group { group_id, from, blob };
        check_fits(&entry)?;
        let delivered = self.mailbox.deposit_many(group.recipients_except(entry.from()), &entry);

        tracing::debug!(
            group_id = %group.group_id,
            from = entry.from(),
            bytes = entry.blob_len(),
            recipients = delivered,
            "group blob fanned out"
        );
        Ok(Response::ack("stored for group"))
    }

    fn fetch_blobs(&self, client_id: &str) -> Response {
        let messages = self.mailbox.take_up_to(client_id, MAX_BATCH_BYTES);

        if !messages.is_empty() {
            let remaining = self.mailbox.pending(client_id);
            tracing::debug!(client_id, count = messages.len(), remaining, "mailbox drained");
        }
        Response::ok().with_messages(messages)
    }

    fn list_all(&self, client_id: &str) -> Response {
        let clients: Vec<String> =
            self.directory.client_ids().into_iter().filter(|id| id != client_id).collect();

        Response::ok().with_listing(clients, self.groups.group_ids())
    }

    fn disconnect(&self, client_id: &str) -> Response {
        let was_active = self.sessions.remove(client_id);

        tracing::debug!(client_id, was_active, "client disconnected");
        Response::ack("disconnected")
    }
}

/// Refuse entries that would overflow a single fetch response.
fn check_fits(entry: &MailboxEntry) -> Result<(), RelayError> {
    let len = entry.batch_cost();
    if len > MAX_BATCH_BYTES {
        return Err(RelayError::BlobTooLarge { len, max: MAX_BATCH_BYTES });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cipherpost_crypto::PublicKey;

    use super::*;
    use crate::storage::MemoryStorage;

    fn relay() -> RelayService {
        RelayService::open(Box::new(MemoryStorage::new())).unwrap()
    }

    fn publish(relay: &RelayService, client_id: &str, byte: u8) {
        let response = relay.handle(Request::PublishKey {
            client_id: client_id.to_string(),
            pubkey: PublicKey::from([byte; 32]),
        });
        assert!(response.is_ok());
    }

    fn create_group(relay: &RelayService, group_id: &str, members: &[&str], admin: &str) -> Response {
        relay.handle(Request::CreateGroup {
            group_id: group_id.to_string(),
            members: members.iter().map(|m| (*m).to_string()).collect(),
            admin: admin.to_string(),
        })
    }

    #[test]
    fn publish_acknowledges_and_registers_session() {
        let relay = relay();
        publish(&relay, "alice", 1);

        assert!(relay.sessions().is_active("alice"));
        assert_eq!(relay.directory().lookup("alice").unwrap(), PublicKey::from([1u8; 32]));
    }

    #[test]
    fn get_key_unknown_is_not_found() {
        let response = relay().handle(Request::GetKey { client_id: "ghost".to_string() });
        assert_eq!(response.error_reason(), Some(reason::NOT_FOUND));
    }

    #[test]
    fn send_blob_deposits_private_entry() {
        let relay = relay();
        let response = relay.handle(Request::SendBlob {
            to: "bob".to_string(),
            from: "alice".to_string(),
            blob: "QUJD".to_string(),
        });

        assert_eq!(response.message.as_deref(), Some("stored"));
        assert_eq!(
            relay.mailbox().take_all("bob"),
            vec![MailboxEntry::Private { from: "alice".to_string(), blob: "QUJD".to_string() }]
        );
    }

    #[test]
    fn oversized_blob_is_refused_before_queueing() {
        let relay = relay();
        create_group(&relay, "g1", &["alice", "bob"], "alice");
        let blob = "A".repeat(MAX_BATCH_BYTES);

        let private = relay.handle(Request::SendBlob {
            to: "bob".to_string(),
            from: "alice".to_string(),
            blob: blob.clone(),
        });
        let group = relay.handle(Request::SendGroupBlob {
            group_id: "g1".to_string(),
            from: "alice".to_string(),
            blob,
        });

        assert_eq!(private.error_reason(), Some(reason::BLOB_TOO_LARGE));
        assert_eq!(group.error_reason(), Some(reason::BLOB_TOO_LARGE));
        assert_eq!(relay.mailbox().total_pending(), 0);
    }

    #[test]
    fn refusals_are_not_internal() {
        let err = RelayError::BlobTooLarge { len: 2, max: 1 };
        assert!(!err.is_internal());
        assert!(!RelayError::from(ProtocolError::InvalidJson("x".to_string())).is_internal());
    }

    #[test]
    fn duplicate_group_is_already_exists() {
        let relay = relay();
        assert!(create_group(&relay, "g1", &["bob"], "alice").is_ok());

        let response = create_group(&relay, "g1", &["carol"], "dave");
        assert_eq!(response.error_reason(), Some(reason::ALREADY_EXISTS));
    }

    #[test]
    fn group_blob_skips_sender() {
        let relay = relay();
        create_group(&relay, "g1", &["alice", "bob", "carol"], "alice");

        let response = relay.handle(Request::SendGroupBlob {
            group_id: "g1".to_string(),
            from: "bob".to_string(),
            blob: "QUJD".to_string(),
        });

        assert!(response.is_ok());
        assert_eq!(relay.mailbox().pending("alice"), 1);
        assert_eq!(relay.mailbox().pending("carol"), 1);
        assert_eq!(relay.mailbox().pending("bob"), 0);
    }

    #[test]
    fn non_member_group_blob_deposits_nothing() {
        let relay = relay();
        create_group(&relay, "g1", &["alice", "bob"], "alice");

        let response = relay.handle(Request::SendGroupBlob {
            group_id: "g1".to_string(),
            from: "mallory".to_string(),
            blob: "QUJD".to_string(),
        });

        assert_eq!(response.error_reason(), Some(reason::NOT_A_MEMBER));
        assert_eq!(relay.mailbox().total_pending(), 0);
    }

    #[test]
    fn unknown_group_blob_is_group_not_found() {
        let response = relay().handle(Request::SendGroupBlob {
            group_id: "nope".to_string(),
            from: "alice".to_string(),
            blob: "QUJD".to_string(),
        });
        assert_eq!(response.error_reason(), Some(reason::GROUP_NOT_FOUND));
    }

    #[test]
    fn list_all_excludes_caller() {
        let relay = relay();
        publish(&relay, "alice", 1);
        publish(&relay, "bob", 2);
        publish(&relay, "carol", 3);
        create_group(&relay, "g1", &["bob"], "alice");

        let response = relay.handle(Request::ListAll { client_id: "bob".to_string() });

        assert_eq!(response.clients, Some(vec!["alice".to_string(), "carol".to_string()]));
        assert_eq!(response.groups, Some(vec!["g1".to_string()]));
    }

    #[test]
    fn disconnect_line_closes_stream() {
        let relay = relay();
        publish(&relay, "alice", 1);

        let reply = relay.handle_line(r#"{"type":"disconnect","client_id":"alice"}"#);

        assert!(reply.close);
        assert_eq!(reply.response.message.as_deref(), Some("disconnected"));
        assert!(!relay.sessions().is_active("alice"));
    }

    #[test]
    fn bad_lines_keep_stream_open() {
        let relay = relay();

        for (line, expected) in [
            ("{nope", "invalid json"),
            (r#"{"type":"teleport"}"#, "unknown type: teleport"),
            (r#"{"type":"get_key"}"#, "get_key requires client_id"),
        ] {
            let reply = relay.handle_line(line);
            assert!(!reply.close);
            assert!(
                reply.response.error_reason().unwrap().starts_with(expected),
                "{line} -> {:?}",
                reply.response
            );
        }
    }
}
