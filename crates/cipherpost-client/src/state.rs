//! Local conversation state and its on-disk form.
//!
//! Everything a client knows that the relay does not: per-peer and per-group
//! history, unread counters, group keys, and group messages still waiting
//! for their key. Written to `<state_dir>/<client_id>_state.json` after
//! every change.

use std::{
    collections::BTreeMap,
    fmt, fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use cipherpost_crypto::GroupKey;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// A conversation: one peer, or one group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConversationRef {
    /// Pairwise conversation with a client.
    Peer(String),
    /// Group conversation.
    Group(String),
}

impl ConversationRef {
    /// Peer or group id.
    pub fn id(&self) -> &str {
        match self {
            Self::Peer(id) | Self::Group(id) => id,
        }
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "@{id}"),
            Self::Group(id) => write!(f, "#{id}"),
        }
    }
}

/// Where a history entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Sent by this client.
    Outgoing,
    /// Received and decrypted.
    Incoming,
    /// Received but could not be opened.
    Undecryptable,
    /// Local event such as joining a group.
    System,
}

/// One line of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unix milliseconds when this client recorded the entry.
    pub timestamp_ms: u64,
    /// Sender identity (this client for outgoing entries).
    pub sender: String,
    /// Origin of the entry.
    pub kind: EntryKind,
    /// Plaintext, or a description for system and undecryptable entries.
    pub text: String,
}

/// History plus unread counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Append-only history, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Incoming entries not yet marked read.
    pub unread: usize,
}

impl Conversation {
    /// Append an entry. Anything not written by this client counts as unread.
    pub fn push(&mut self, entry: HistoryEntry) {
        if matches!(entry.kind, EntryKind::Incoming | EntryKind::Undecryptable) {
            self.unread += 1;
        }
        self.history.push(entry);
    }
}

/// A group message received before its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGroupMessage {
    /// Sender identity.
    pub from: String,
    /// Sealed payload, still base64.
    pub blob: String,
    /// Unix milliseconds when it was fetched.
    pub received_ms: u64,
}

/// Everything held about one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    /// Shared key, once received or created.
    #[serde(default, with = "group_key_b64")]
    pub key: Option<GroupKey>,
    /// Group conversation.
    #[serde(default)]
    pub conversation: Conversation,
    /// Messages waiting for `key`, in arrival order.
    #[serde(default)]
    pub pending: Vec<PendingGroupMessage>,
}

/// All local state for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    /// Pairwise conversations by peer id.
    #[serde(default)]
    pub peers: BTreeMap<String, Conversation>,
    /// Groups by group id.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupState>,
}

impl ClientState {
    /// Conversation for `conversation`, if known.
    pub fn conversation(&self, conversation: &ConversationRef) -> Option<&Conversation> {
        match conversation {
            ConversationRef::Peer(id) => self.peers.get(id),
            ConversationRef::Group(id) => self.groups.get(id).map(|group| &group.conversation),
        }
    }

    /// Conversation for `conversation`, created empty if unknown.
    pub fn conversation_mut(&mut self, conversation: &ConversationRef) -> &mut Conversation {
        match conversation {
            ConversationRef::Peer(id) => self.peers.entry(id.clone()).or_default(),
            ConversationRef::Group(id) => &mut self.groups.entry(id.clone()).or_default().conversation,
        }
    }

    /// Every known conversation, peers first, each sorted by id.
    pub fn conversations(&self) -> Vec<ConversationRef> {
        self.peers
            .keys()
            .cloned()
            .map(ConversationRef::Peer)
            .chain(self.groups.keys().cloned().map(ConversationRef::Group))
            .collect()
    }
}

/// Reads and writes [`ClientState`] as JSON.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store for `client_id` under `state_dir`.
    pub fn new(state_dir: &Path, client_id: &str) -> Self {
        Self { path: state_dir.join(format!("{client_id}_state.json")) }
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state. A missing file is a fresh client.
    ///
    /// # Errors
    ///
    /// A file that exists but does not parse is reported rather than
    /// replaced, since it may hold the only copy of a group key.
    pub fn load(&self) -> Result<ClientState, ClientError> {
        match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| ClientError::storage(&self.path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientState::default()),
            Err(e) => Err(ClientError::storage(&self.path, e)),
        }
    }

    /// Replace the saved state.
    pub fn save(&self, state: &ClientState) -> Result<(), ClientError> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| ClientError::storage(&self.path, e))?;
        write_atomically(&self.path, &json)
    }
}

/// Write through a sibling temp file and rename over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ClientError> {
    let fail = |e: std::io::Error| ClientError::storage(path, e);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path).map_err(fail)?;
    file.write_all(contents).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(fail)
}

mod group_key_b64 {
    use cipherpost_crypto::GroupKey;
    use cipherpost_proto::b64;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use zeroize::Zeroizing;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(key: &Option<GroupKey>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_str(&Zeroizing::new(b64::encode(key.as_bytes()))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<GroupKey>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let encoded = Zeroizing::new(encoded);
        let raw = Zeroizing::new(b64::decode(&encoded).map_err(D::Error::custom)?);
        GroupKey::from_bytes(&raw).map(Some).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind, text: &str) -> HistoryEntry {
        HistoryEntry { timestamp_ms: 1, sender: "bob".to_string(), kind, text: text.to_string() }
    }

    #[test]
    fn only_received_entries_count_as_unread() {
        let mut conversation = Conversation::default();
        conversation.push(entry(EntryKind::Outgoing, "hi"));
        conversation.push(entry(EntryKind::System, "joined"));
        conversation.push(entry(EntryKind::Incoming, "hello"));
        conversation.push(entry(EntryKind::Undecryptable, "bad tag"));

        assert_eq!(conversation.unread, 2);
        assert_eq!(conversation.history.len(), 4);
    }

    #[test]
    fn missing_state_file_is_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "alice");

        assert_eq!(store.load().unwrap(), ClientState::default());
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "alice");

        let mut state = ClientState::default();
        state.conversation_mut(&ConversationRef::Peer("bob".to_string())).push(entry(EntryKind::Incoming, "hi"));
        let group = state.groups.entry("g1".to_string()).or_default();
        group.key = Some(GroupKey::from_bytes(&[4u8; 32]).unwrap());
        group.pending.push(PendingGroupMessage {
            from: "carol".to_string(),
            blob: "QUJD".to_string(),
            received_ms: 9,
        });

        store.save(&state).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, state);
        assert!(store.path().ends_with("alice_state.json"));
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "alice");
        fs::write(store.path(), b"[1, 2").unwrap();

        assert!(matches!(store.load(), Err(ClientError::Storage { .. })));
    }

    #[test]
    fn conversations_list_peers_then_groups() {
        let mut state = ClientState::default();
        state.conversation_mut(&ConversationRef::Group("g1".to_string()));
        state.conversation_mut(&ConversationRef::Peer("zed".to_string()));
        state.conversation_mut(&ConversationRef::Peer("amy".to_string()));

        assert_eq!(
            state.conversations(),
            vec![
                ConversationRef::Peer("amy".to_string()),
                ConversationRef::Peer("zed".to_string()),
                ConversationRef::Group("g1".to_string()),
            ]
        );
        assert_eq!(ConversationRef::Group("g1".to_string()).to_string(), "#g1");
    }
}
