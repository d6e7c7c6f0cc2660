//! Cipherpost client
//!
//! Client side of the cipherpost relay. Holds the long-term identity key,
//! seals outgoing messages, opens fetched ones, and keeps per-conversation
//! history on disk. The relay only ever sees ciphertext.
//!
//! # Architecture
//!
//! The [`ClientSession`] sits between the caller and two seams:
//! - [`RelayApi`]: one request, one response (QUIC in production via
//!   [`QuicRelay`], in-process in tests)
//! - [`Environment`]: wall-clock time, sleeping and randomness
//!
//! # Components
//!
//! - [`ClientSession`]: send, create groups, poll, history
//! - [`IdentityStore`]: the X25519 key file
//! - [`StateStore`]: history, unread counters, group keys, buffered messages

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod env;
mod error;
mod identity;
mod session;
mod state;
mod system_env;
#[cfg(feature = "transport")]
mod transport;

pub use api::{RelayApi, expect_ok};
pub use env::Environment;
pub use error::ClientError;
pub use identity::IdentityStore;
pub use session::{
    ClientConfig, ClientSession, DEFAULT_POLL_INTERVAL, GroupCreation, Listing, PollReport,
    ReceivedMessage, Undecryptable,
};
pub use state::{
    ClientState, Conversation, ConversationRef, EntryKind, GroupState, HistoryEntry,
    PendingGroupMessage, StateStore,
};
pub use system_env::SystemEnv;
#[cfg(feature = "transport")]
pub use transport::{QuicRelay, load_ca_pem, root_from_der};
