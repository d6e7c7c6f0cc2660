//! Fuzz target for request line handling
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input interpreted as one request line
//! - Goes through the same path as a live stream: decode, handle, encode
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Every line gets exactly one response, and it re-encodes as one line
//! - A line that fails to decode never changes relay state
//! - Only a successful `disconnect` closes the stream

#![no_main]

use cipherpost_proto::{decode_request, decode_response, encode_line, RequestKind};
use cipherpost_server::{MemoryStorage, RelayService};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(relay) = RelayService::open(Box::new(MemoryStorage::new())) else {
        return;
    };

    let decoded = decode_request(line);
    let reply = relay.handle_line(line);

    let encoded = encode_line(&reply.response).expect("response must encode");
    assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);
    let text = std::str::from_utf8(&encoded).expect("response is UTF-8");
    assert_eq!(decode_response(text).expect("response must decode"), reply.response);

    match decoded {
        Ok(request) => {
            if reply.close {
                assert_eq!(request.kind(), RequestKind::Disconnect);
            }
        },
        Err(_) => {
            assert!(!reply.response.is_ok());
            assert!(!reply.close);
            assert!(relay.directory().is_empty());
            assert!(relay.groups().is_empty());
            assert_eq!(relay.mailbox().total_pending(), 0);
        },
    }
});
