//! Fuzz target for envelope parsing and opening
//!
//! Everything a client fetches is attacker-controlled: the relay forwards
//! blobs verbatim.
//!
//! # Strategy
//!
//! - Blob strings: arbitrary text fed to both private and group decoders
//! - Sealed bytes: arbitrary bytes opened under fixed keys
//! - Bit flips: a valid sealed message with one flipped bit
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Parsed envelopes always carry at least nonce + tag bytes
//! - Forged or flipped payloads NEVER open

#![no_main]

use arbitrary::Arbitrary;
use cipherpost_crypto::{
    derive_pairwise_key, open_pairwise, open_symmetric, seal_symmetric, GroupKey, KeyPair,
    MIN_SEALED_SIZE,
};
use cipherpost_proto::{decode_sealed, DirectEnvelope};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    blob: String,
    sealed: Vec<u8>,
    plaintext: Vec<u8>,
    flip_at: usize,
    flip_bit: u8,
}

fuzz_target!(|input: Input| {
    let me = KeyPair::from_secret_bytes(&[7u8; 32]).expect("fixed key");
    let peer = KeyPair::from_secret_bytes(&[9u8; 32]).expect("fixed key");
    let group_key = GroupKey::from_bytes(&[3u8; 32]).expect("fixed key");

    if let Ok(envelope) = DirectEnvelope::from_blob(&input.blob) {
        assert!(envelope.sealed().len() >= MIN_SEALED_SIZE);
        if let Ok(secret) = derive_pairwise_key(&me, envelope.sender_pub()) {
            let _ = open_pairwise(&secret, envelope.sealed());
        }
    }

    if let Ok(sealed) = decode_sealed(&input.blob) {
        assert!(sealed.len() >= MIN_SEALED_SIZE);
        assert!(open_symmetric(&group_key, &sealed).is_err());
    }

    if let Ok(secret) = derive_pairwise_key(&me, &peer.public_key()) {
        assert!(open_pairwise(&secret, &input.sealed).is_err());
    }
    assert!(open_symmetric(&group_key, &input.sealed).is_err());

    let mut sealed = seal_symmetric(&group_key, &input.plaintext).expect("seal");
    let at = input.flip_at % sealed.len();
    let bit = 1u8 << (input.flip_bit % 8);
    sealed[at] ^= bit;
    assert!(open_symmetric(&group_key, &sealed).is_err());
});
