//! Fuzz target for relay request sequences
//!
//! # Strategy
//!
//! - Small identity space so requests collide on the same clients and groups
//! - Arbitrary interleaving of publish, send, group and fetch operations
//! - A shadow model counts what each mailbox should hold
//!
//! # Invariants
//!
//! - NEVER panic
//! - Every stored blob is fetched exactly once, in deposit order
//! - Group blobs reach every member except the sender, and nobody else
//! - Non-members are refused and deposit nothing
//! - A group id can be created once

#![no_main]

use std::collections::{BTreeSet, HashMap};

use arbitrary::Arbitrary;
use cipherpost_crypto::PublicKey;
use cipherpost_proto::{MailboxEntry, Request};
use cipherpost_server::{MemoryStorage, RelayService};
use libfuzzer_sys::fuzz_target;

const CLIENTS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const GROUPS: [&str; 2] = ["g0", "g1"];

#[derive(Debug, Arbitrary)]
enum Op {
    Publish { client: u8, key: u8 },
    Send { from: u8, to: u8, tag: u16 },
    CreateGroup { group: u8, admin: u8, members: u8 },
    SendGroup { group: u8, from: u8, tag: u16 },
    Fetch { client: u8 },
}

fn client(index: u8) -> &'static str {
    CLIENTS[usize::from(index) % CLIENTS.len()]
}

fn group(index: u8) -> &'static str {
    GROUPS[usize::from(index) % GROUPS.len()]
}

fuzz_target!(|ops: Vec<Op>| {
    let Ok(relay) = RelayService::open(Box::new(MemoryStorage::new())) else {
        return;
    };
    let mut expected: HashMap<&str, Vec<String>> = HashMap::new();
    let mut groups: HashMap<&str, BTreeSet<&str>> = HashMap::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Publish { client: c, key } => {
                let response = relay.handle(Request::PublishKey {
                    client_id: client(c).to_string(),
                    pubkey: PublicKey::from([key; 32]),
                });
                assert!(response.is_ok());
            },
            Op::Send { from, to, tag } => {
                let blob = format!("p{tag}");
                let response = relay.handle(Request::SendBlob {
                    to: client(to).to_string(),
                    from: client(from).to_string(),
                    blob: blob.clone(),
                });
                assert!(response.is_ok());
                expected.entry(client(to)).or_default().push(blob);
            },
            Op::CreateGroup { group: g, admin, members } => {
                let mut set: BTreeSet<&str> = CLIENTS
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| members & (1 << i) != 0)
                    .map(|(_, id)| *id)
                    .collect();
                set.insert(client(admin));

                let response = relay.handle(Request::CreateGroup {
                    group_id: group(g).to_string(),
                    members: set.iter().map(|id| (*id).to_string()).collect(),
                    admin: client(admin).to_string(),
                });

                if groups.contains_key(group(g)) {
                    assert_eq!(response.error_reason(), Some("already exists"));
                } else {
                    assert!(response.is_ok());
                    groups.insert(group(g), set);
                }
            },
            Op::SendGroup { group: g, from, tag } => {
                let blob = format!("g{tag}");
                let response = relay.handle(Request::SendGroupBlob {
                    group_id: group(g).to_string(),
                    from: client(from).to_string(),
                    blob: blob.clone(),
                });

                match groups.get(group(g)) {
                    None => assert_eq!(response.error_reason(), Some("group not found")),
                    Some(members) if !members.contains(client(from)) => {
                        assert_eq!(response.error_reason(), Some("not a member of this group"));
                    },
                    Some(members) => {
                        assert!(response.is_ok());
                        for member in members.iter().filter(|m| **m != client(from)) {
                            expected.entry(*member).or_default().push(blob.clone());
                        }
                    },
                }
            },
            Op::Fetch { client: c } => {
                let response =
                    relay.handle(Request::FetchBlobs { client_id: client(c).to_string() });
                let blobs: Vec<String> = response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .map(|entry| match entry {
                        MailboxEntry::Private { blob, .. } | MailboxEntry::Group { blob, .. } => {
                            blob
                        },
                    })
                    .collect();
                assert_eq!(blobs, expected.remove(client(c)).unwrap_or_default());
            },
        }
    }
});
