//! Client session.
//!
//! The `ClientSession` owns this client's identity key, its local state, and
//! a handle to the relay. It turns user intents (send, create group) into
//! sealed envelopes, and fetched mailbox entries back into history.
//!
//! ## Receive path
//!
//! ```text
//! fetch_blobs
//!   ├─ private ─> direct envelope
//!   │              ├─ message                 -> open pairwise  -> peer history
//!   │              └─ group_key_distribution  -> open pairwise  -> store key,
//!   │                                                              replay buffered
//!   └─ group ───> key held?   yes -> open symmetric -> group history
//!                             no  -> buffer until the key arrives
//! ```
//!
//! Each entry is handled on its own: a failure is recorded against that entry
//! and the rest of the batch carries on.
//!
//! ## Sender binding
//!
//! A private envelope names its sender twice: `from` on the mailbox entry,
//! which the relay copies from the request, and `sender_pub` inside the
//! blob. Both are attacker-chosen. Before opening, the session looks up the
//! directory key for every `from` in the batch (once each) and drops any
//! envelope whose `sender_pub` differs.
//!
//! Group keys are first-key-wins: once a key is held, an identical
//! distribution is ignored and a different one is reported, never installed.

use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use cipherpost_crypto::{
    GroupKey, KEY_SIZE, KeyPair, PublicKey, derive_pairwise_key, open_pairwise, open_symmetric,
    seal_pairwise, seal_symmetric,
};
use cipherpost_proto::{
    DirectEnvelope, MailboxEntry, ProtocolError, Request, Response, decode_sealed, encode_sealed,
    reason,
};
use tokio::sync::watch;
use zeroize::Zeroizing;

use crate::{
    api::{RelayApi, expect_ok},
    env::Environment,
    error::ClientError,
    identity::IdentityStore,
    state::{
        ClientState, ConversationRef, EntryKind, GroupState, HistoryEntry, PendingGroupMessage,
        StateStore,
    },
    system_env::SystemEnv,
};

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity this client publishes and fetches as.
    pub client_id: String,
    /// Directory holding the key file and the state file.
    pub state_dir: PathBuf,
    /// Delay between mailbox fetches in the poll loop.
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Defaults for `client_id`: state in the working directory, 500 ms polling.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            state_dir: PathBuf::from("."),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Keep key and state files under `state_dir`.
    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }
}

/// A decrypted message from one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Conversation it was added to.
    pub conversation: ConversationRef,
    /// Sender identity.
    pub from: String,
    /// Plaintext.
    pub text: String,
}

/// A fetched entry that could not be opened.
#[derive(Debug)]
pub struct Undecryptable {
    /// Conversation it was recorded against.
    pub conversation: ConversationRef,
    /// Claimed sender.
    pub from: String,
    /// Why it failed.
    pub error: ClientError,
}

/// Outcome of one `poll_once`.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Messages decrypted, including buffered group messages released by a
    /// key that arrived in this batch.
    pub delivered: Vec<ReceivedMessage>,
    /// Groups whose key arrived in this batch.
    pub group_keys: Vec<String>,
    /// Entries that failed to open.
    pub undecryptable: Vec<Undecryptable>,
    /// Group messages held back because their key has not arrived yet.
    pub buffered: usize,
}

impl PollReport {
    /// True if the mailbox was empty.
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
            && self.group_keys.is_empty()
            && self.undecryptable.is_empty()
            && self.buffered == 0
    }
}

/// Per-member result of distributing a new group's key.
#[derive(Debug)]
pub struct GroupCreation {
    /// Group that was created.
    pub group_id: String,
    /// Members whose key envelope was stored by the relay.
    pub delivered: Vec<String>,
    /// Members who will not receive the key, and why.
    pub failed: Vec<(String, ClientError)>,
}

/// Peers and groups the relay knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Client ids other than this client.
    pub clients: Vec<String>,
    /// Group ids.
    pub groups: Vec<String>,
}

/// Client-side state machine for one identity.
///
/// Methods take `&self`: share the session behind an `Arc` to run the poll
/// loop alongside user-initiated sends. Local state sits behind a lock that
/// is never held across a relay call.
pub struct ClientSession<R, E = SystemEnv> {
    client_id: String,
    keys: KeyPair,
    relay: R,
    env: E,
    store: StateStore,
    state: Mutex<ClientState>,
    poll_interval: Duration,
}

impl<R, E> ClientSession<R, E>
where
    R: RelayApi,
    E: Environment,
{
    /// Load (or create) the identity key and local state. Makes no relay call.
    pub fn open(config: ClientConfig, relay: R, env: E) -> Result<Self, ClientError> {
        let keys = IdentityStore::new(&config.state_dir, &config.client_id).load_or_create()?;
        let store = StateStore::new(&config.state_dir, &config.client_id);
        let state = store.load()?;

        tracing::debug!(
            client_id = %config.client_id,
            conversations = state.peers.len() + state.groups.len(),
            "client state loaded"
        );

        Ok(Self {
            client_id: config.client_id,
            keys,
            relay,
            env,
            store,
            state: Mutex::new(state),
            poll_interval: config.poll_interval,
        })
    }

    /// Open the session and publish this client's key.
    pub async fn start(config: ClientConfig, relay: R, env: E) -> Result<Self, ClientError> {
        let session = Self::open(config, relay, env)?;
        session.publish_key().await?;
        Ok(session)
    }

    /// This client's identity.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// This client's public key.
    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Publish (or republish) this client's public key.
    pub async fn publish_key(&self) -> Result<(), ClientError> {
        self.call(Request::PublishKey {
            client_id: self.client_id.clone(),
            pubkey: self.public_key(),
        })
        .await?;

        tracing::info!(client_id = %self.client_id, "public key published");
        Ok(())
    }

    /// Fetch a peer's current public key.
    ///
    /// # Errors
    ///
    /// `PeerNotFound` if the peer has never published.
    pub async fn lookup_key(&self, client_id: &str) -> Result<PublicKey, ClientError> {
        let response = self.relay.call(Request::GetKey { client_id: client_id.to_string() }).await?;

        match response.error_reason() {
            Some(reason::NOT_FOUND) => Err(ClientError::PeerNotFound(client_id.to_string())),
            Some(other) => {
                Err(ClientError::Relay { request: "get_key", reason: other.to_string() })
            },
            None => response.pubkey.ok_or_else(|| ClientError::InvalidState {
                reason: format!("relay returned no key for {client_id}"),
            }),
        }
    }

    /// Seal `text` for `to` and hand it to the relay.
    ///
    /// Nothing is sent if `to` has no published key.
    pub async fn send_private(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let their_pub = self.lookup_key(to).await?;
        let secret = derive_pairwise_key(&self.keys, &their_pub)?;

        let envelope = DirectEnvelope::Message {
            sender_pub: self.public_key(),
            blob: seal_pairwise(&secret, text.as_bytes())?,
        };
        self.call(Request::SendBlob {
            to: to.to_string(),
            from: self.client_id.clone(),
            blob: envelope.to_blob()?,
        })
        .await?;

        tracing::debug!(to, bytes = text.len(), "private message sent");
        let entry = self.entry(&self.client_id, EntryKind::Outgoing, text);
        self.update(|state| state.conversation_mut(&ConversationRef::Peer(to.to_string())).push(entry))
    }

    /// Seal `text` under the group key and send it to every other member.
    ///
    /// # Errors
    ///
    /// `UnknownGroup` if this client holds no key for `group_id`.
    pub async fn send_group(&self, group_id: &str, text: &str) -> Result<(), ClientError> {
        let key = self
            .lock()
            .groups
            .get(group_id)
            .and_then(|group| group.key.clone())
            .ok_or_else(|| ClientError::UnknownGroup(group_id.to_string()))?;

        let sealed = seal_symmetric(&key, text.as_bytes())?;
        self.call(Request::SendGroupBlob {
            group_id: group_id.to_string(),
            from: self.client_id.clone(),
            blob: encode_sealed(&sealed),
        })
        .await?;

        tracing::debug!(group_id, bytes = text.len(), "group message sent");
        let entry = self.entry(&self.client_id, EntryKind::Outgoing, text);
        self.update(|state| {
            state.conversation_mut(&ConversationRef::Group(group_id.to_string())).push(entry);
        })
    }

    /// Create `group_id` with `members` (this client is always added) and
    /// send the new group key to every other member.
    ///
    /// Fails only if the relay refuses the group. Per-member delivery
    /// failures are collected in the returned report; those members simply
    /// never receive the key.
    pub async fn create_group(
        &self,
        group_id: &str,
        members: &[String],
    ) -> Result<GroupCreation, ClientError> {
        let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
        self.env.random_bytes(&mut *key_bytes);
        let key = GroupKey::from_bytes(&*key_bytes)?;

        let mut all: BTreeSet<String> = members.iter().cloned().collect();
        all.insert(self.client_id.clone());

        self.call(Request::CreateGroup {
            group_id: group_id.to_string(),
            members: all.iter().cloned().collect(),
            admin: self.client_id.clone(),
        })
        .await?;

        let note = self.entry(
            &self.client_id,
            EntryKind::System,
            &format!("created group with {} members", all.len()),
        );
        let stored_key = key.clone();
        self.update(|state| {
            let group = state.groups.entry(group_id.to_string()).or_default();
            group.key = Some(stored_key);
            group.conversation.push(note);
        })?;

        let mut report =
            GroupCreation { group_id: group_id.to_string(), delivered: Vec::new(), failed: Vec::new() };

        for member in all.iter().filter(|member| **member != self.client_id) {
            match self.distribute_key(group_id, member, &key).await {
                Ok(()) => report.delivered.push(member.clone()),
                Err(err) => {
                    tracing::warn!(group_id, member = %member, error = %err, "group key not delivered");
                    report.failed.push((member.clone(), err));
                },
            }
        }

        tracing::info!(
            group_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "group created"
        );
        Ok(report)
    }

    async fn distribute_key(
        &self,
        group_id: &str,
        member: &str,
        key: &GroupKey,
    ) -> Result<(), ClientError> {
        let their_pub = self.lookup_key(member).await?;
        let secret = derive_pairwise_key(&self.keys, &their_pub)?;

        let envelope = DirectEnvelope::GroupKeyDistribution {
            group_id: group_id.to_string(),
            sender_pub: self.public_key(),
            key_blob: seal_pairwise(&secret, key.as_bytes())?,
        };
        self.call(Request::SendBlob {
            to: member.to_string(),
            from: self.client_id.clone(),
            blob: envelope.to_blob()?,
        })
        .await?;
        Ok(())
    }

    /// Drain the mailbox once and fold every entry into local state.
    ///
    /// # Errors
    ///
    /// Only the fetch itself, or saving state, can fail. Entries that do not
    /// open are reported in [`PollReport::undecryptable`].
    pub async fn poll_once(&self) -> Result<PollReport, ClientError> {
        let response =
            self.call(Request::FetchBlobs { client_id: self.client_id.clone() }).await?;
        let entries = response.messages.unwrap_or_default();

        let mut report = PollReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let senders = self.sender_keys(&entries).await;
        let now = self.env.now_millis();
        self.update(|state| {
            for entry in entries {
                match entry {
                    MailboxEntry::Private { from, blob } => {
                        self.receive_private(state, &senders, from, &blob, now, &mut report);
                    },
                    MailboxEntry::Group { group_id, from, blob } => {
                        receive_group(state, &group_id, from, blob, now, &mut report);
                    },
                }
            }
        })?;

        tracing::debug!(
            delivered = report.delivered.len(),
            keys = report.group_keys.len(),
            undecryptable = report.undecryptable.len(),
            buffered = report.buffered,
            "mailbox processed"
        );
        Ok(report)
    }

    /// Poll every `interval` until `shutdown` turns true or its sender drops.
    ///
    /// Transport failures are logged and retried on the next tick.
    pub async fn run_poll_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(client_id = %self.client_id, ?interval, "poll loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(_) => {},
                Err(err) if err.is_retryable() => {
                    tracing::warn!(error = %err, "poll failed, retrying next tick");
                },
                Err(err) => tracing::error!(error = %err, "poll failed"),
            }

            tokio::select! {
                () = self.env.sleep(interval) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
        }

        tracing::info!(client_id = %self.client_id, "poll loop stopped");
    }

    /// Ask the relay who is reachable, and open an empty conversation for
    /// every peer and group not seen before.
    pub async fn list_all(&self) -> Result<Listing, ClientError> {
        let response = self.call(Request::ListAll { client_id: self.client_id.clone() }).await?;
        let listing = Listing {
            clients: response.clients.unwrap_or_default(),
            groups: response.groups.unwrap_or_default(),
        };

        self.update(|state| {
            for client in &listing.clients {
                state.peers.entry(client.clone()).or_default();
            }
            for group in &listing.groups {
                state.groups.entry(group.clone()).or_default();
            }
        })?;
        Ok(listing)
    }

    /// Tell the relay this client is going away.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.call(Request::Disconnect { client_id: self.client_id.clone() }).await?;
        tracing::info!(client_id = %self.client_id, "disconnected");
        Ok(())
    }

    /// Reset the unread counter for a conversation.
    pub fn mark_read(&self, conversation: &ConversationRef) -> Result<(), ClientError> {
        self.update(|state| {
            if state.conversation(conversation).is_some() {
                state.conversation_mut(conversation).unread = 0;
            }
        })
    }

    /// History of a conversation, oldest first. Empty if unknown.
    pub fn history(&self, conversation: &ConversationRef) -> Vec<HistoryEntry> {
        self.lock().conversation(conversation).map(|c| c.history.clone()).unwrap_or_default()
    }

    /// Unread count of a conversation.
    pub fn unread(&self, conversation: &ConversationRef) -> usize {
        self.lock().conversation(conversation).map_or(0, |c| c.unread)
    }

    /// Every known conversation.
    pub fn conversations(&self) -> Vec<ConversationRef> {
        self.lock().conversations()
    }

    /// True if this client holds the key for `group_id`.
    pub fn has_group_key(&self, group_id: &str) -> bool {
        self.lock().groups.get(group_id).is_some_and(|group| group.key.is_some())
    }

    /// Group messages waiting for their key.
    pub fn pending_group_messages(&self, group_id: &str) -> usize {
        self.lock().groups.get(group_id).map_or(0, |group| group.pending.len())
    }

    /// Directory key of every private sender in `entries`, one lookup each.
    async fn sender_keys(&self, entries: &[MailboxEntry]) -> SenderKeys {
        let mut keys = SenderKeys::new();
        for entry in entries {
            let MailboxEntry::Private { from, .. } = entry else { continue };
            if keys.contains_key(from) {
                continue;
            }
            let published = self.lookup_key(from).await.map_err(|err| err.to_string());
            keys.insert(from.clone(), published);
        }
        keys
    }

    fn receive_private(
        &self,
        state: &mut ClientState,
        senders: &SenderKeys,
        from: String,
        blob: &str,
        now: u64,
        report: &mut PollReport,
    ) {
        let envelope = match DirectEnvelope::from_blob(blob) {
            Ok(envelope) => envelope,
            Err(err) => {
                let conversation = ConversationRef::Peer(from.clone());
                record_undecryptable(state, conversation, from, err.into(), now, report);
                return;
            },
        };

        if let Err(err) = verify_sender(senders, &from, envelope.sender_pub()) {
            let conversation = ConversationRef::Peer(from.clone());
            record_undecryptable(state, conversation, from, err, now, report);
            return;
        }

        let opened = derive_pairwise_key(&self.keys, envelope.sender_pub())
            .and_then(|secret| open_pairwise(&secret, envelope.sealed()))
            .map(Zeroizing::new);

        match envelope {
            DirectEnvelope::Message { .. } => {
                let conversation = ConversationRef::Peer(from.clone());
                match opened.map_err(ClientError::from).and_then(|raw| into_text(raw.to_vec())) {
                    Ok(text) => deliver(state, conversation, from, text, now, report),
                    Err(err) => record_undecryptable(state, conversation, from, err, now, report),
                }
            },
            DirectEnvelope::GroupKeyDistribution { group_id, .. } => {
                match opened.and_then(|raw| GroupKey::from_bytes(&raw)) {
                    Ok(key) => install_group_key(state, &group_id, &from, key, now, report),
                    Err(err) => {
                        let conversation = ConversationRef::Group(group_id);
                        record_undecryptable(state, conversation, from, err.into(), now, report);
                    },
                }
            },
        }
    }

    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let kind = request.kind();
        let response = self.relay.call(request).await?;
        expect_ok(kind, response)
    }

    fn entry(&self, sender: &str, kind: EntryKind, text: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp_ms: self.env.now_millis(),
            sender: sender.to_string(),
            kind,
            text: text.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to local state and persist the result.
    fn update<T>(&self, change: impl FnOnce(&mut ClientState) -> T) -> Result<T, ClientError> {
        let mut state = self.lock();
        let out = change(&mut state);
        self.store.save(&state)?;
        Ok(out)
    }
}

/// Published key per sender, or why it could not be fetched.
type SenderKeys = HashMap<String, Result<PublicKey, String>>;

fn verify_sender(
    senders: &SenderKeys,
    from: &str,
    sender_pub: &PublicKey,
) -> Result<(), ClientError> {
    let reason = match senders.get(from) {
        Some(Ok(published)) if published == sender_pub => return Ok(()),
        Some(Ok(_)) => "envelope key does not match the published key".to_string(),
        Some(Err(reason)) => reason.clone(),
        None => "sender key was not looked up".to_string(),
    };
    Err(ClientError::UnverifiedSender { from: from.to_string(), reason })
}

fn receive_group(
    state: &mut ClientState,
    group_id: &str,
    from: String,
    blob: String,
    now: u64,
    report: &mut PollReport,
) {
    let group = state.groups.entry(group_id.to_string()).or_default();

    match group.key.clone() {
        Some(key) => open_group_message(group_id, group, &key, from, &blob, now, report),
        None => {
            tracing::debug!(group_id, from = %from, "group message buffered until key arrives");
            group.pending.push(PendingGroupMessage { from, blob, received_ms: now });
            report.buffered += 1;
        },
    }
}

fn install_group_key(
    state: &mut ClientState,
    group_id: &str,
    from: &str,
    key: GroupKey,
    now: u64,
    report: &mut PollReport,
) {
    let group = state.groups.entry(group_id.to_string()).or_default();

    match group.key.as_ref().map(|held| *held == key) {
        Some(true) => {
            tracing::debug!(group_id, from, "duplicate group key ignored");
            return;
        },
        Some(false) => {
            let error =
                ClientError::GroupKeyConflict { group_id: group_id.to_string(), from: from.to_string() };
            tracing::warn!(group_id, from, %error, "conflicting group key rejected");
            group.conversation.push(undecryptable_entry(from, &error, now));
            report.undecryptable.push(Undecryptable {
                conversation: ConversationRef::Group(group_id.to_string()),
                from: from.to_string(),
                error,
            });
            return;
        },
        None => {},
    }

    group.key = Some(key.clone());
    group.conversation.push(HistoryEntry {
        timestamp_ms: now,
        sender: from.to_string(),
        kind: EntryKind::System,
        text: format!("added to group by {from}"),
    });
    report.group_keys.push(group_id.to_string());

    let pending = std::mem::take(&mut group.pending);
    if !pending.is_empty() {
        tracing::debug!(group_id, count = pending.len(), "replaying buffered group messages");
    }
    for message in pending {
        let PendingGroupMessage { from, blob, received_ms } = message;
        open_group_message(group_id, group, &key, from, &blob, received_ms, report);
    }
}

fn open_group_message(
    group_id: &str,
    group: &mut GroupState,
    key: &GroupKey,
    from: String,
    blob: &str,
    timestamp_ms: u64,
    report: &mut PollReport,
) {
    let conversation = ConversationRef::Group(group_id.to_string());
    let opened = decode_sealed(blob)
        .map_err(ClientError::from)
        .and_then(|sealed| Ok(open_symmetric(key, &sealed)?))
        .and_then(into_text);

    match opened {
        Ok(text) => {
            group.conversation.push(HistoryEntry {
                timestamp_ms,
                sender: from.clone(),
                kind: EntryKind::Incoming,
                text: text.clone(),
            });
            report.delivered.push(ReceivedMessage { conversation, from, text });
        },
        Err(error) => {
            tracing::warn!(
                group_id,
                from = %from,
                tampered = error.is_payload_error(),
                %error,
                "undecryptable group message"
            );
            group.conversation.push(undecryptable_entry(&from, &error, timestamp_ms));
            report.undecryptable.push(Undecryptable { conversation, from, error });
        },
    }
}

fn deliver(
    state: &mut ClientState,
    conversation: ConversationRef,
    from: String,
    text: String,
    now: u64,
    report: &mut PollReport,
) {
    state.conversation_mut(&conversation).push(HistoryEntry {
        timestamp_ms: now,
        sender: from.clone(),
        kind: EntryKind::Incoming,
        text: text.clone(),
    });
    report.delivered.push(ReceivedMessage { conversation, from, text });
}

fn record_undecryptable(
    state: &mut ClientState,
    conversation: ConversationRef,
    from: String,
    error: ClientError,
    now: u64,
    report: &mut PollReport,
) {
    tracing::warn!(
        %conversation,
        from = %from,
        tampered = error.is_payload_error(),
        %error,
        "undecryptable message"
    );
    state.conversation_mut(&conversation).push(undecryptable_entry(&from, &error, now));
    report.undecryptable.push(Undecryptable { conversation, from, error });
}

fn undecryptable_entry(from: &str, error: &ClientError, timestamp_ms: u64) -> HistoryEntry {
    HistoryEntry {
        timestamp_ms,
        sender: from.to_string(),
        kind: EntryKind::Undecryptable,
        text: format!("undecryptable message: {error}"),
    }
}

fn into_text(raw: Vec<u8>) -> Result<String, ClientError> {
    String::from_utf8(raw).map_err(|_| {
        ClientError::Protocol(ProtocolError::MalformedEnvelope("plaintext is not UTF-8".to_string()))
    })
}
