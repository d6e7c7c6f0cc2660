//! Property tests for end-to-end delivery through an in-process relay.

#![allow(clippy::unwrap_used)]

mod common;

use cipherpost_client::ConversationRef;
use common::{LocalRelay, TestEnv, start};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn private_messages_arrive_intact_and_in_order(texts in prop::collection::vec(".{0,200}", 1..8)) {
        let delivered = runtime().block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let relay = LocalRelay::new();
            let env = TestEnv::default();
            let alice = start(dir.path(), "alice", &relay, &env).await;
            let bob = start(dir.path(), "bob", &relay, &env).await;

            for text in &texts {
                alice.send_private("bob", text).await.unwrap();
            }
            bob.poll_once().await.unwrap().delivered
        });

        let received: Vec<String> = delivered.into_iter().map(|m| m.text).collect();
        prop_assert_eq!(received, texts);
    }

    #[test]
    fn group_messages_reach_every_other_member(
        others in prop::collection::btree_set("[a-z]{3,8}", 1..5),
        text in ".{0,200}",
    ) {
        let results = runtime().block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let relay = LocalRelay::new();
            let env = TestEnv::default();
            let admin = start(dir.path(), "admin0", &relay, &env).await;

            let mut sessions = Vec::new();
            for id in &others {
                sessions.push(start(dir.path(), id, &relay, &env).await);
            }
            let members: Vec<String> = others.iter().cloned().collect();
            admin.create_group("g", &members).await.unwrap();
            admin.send_group("g", &text).await.unwrap();

            let mut results = Vec::new();
            for session in &sessions {
                session.poll_once().await.unwrap();
                let history = session.history(&ConversationRef::Group("g".to_string()));
                results.push(history.last().map(|entry| entry.text.clone()));
            }
            results
        });

        for received in results {
            prop_assert_eq!(received.as_deref(), Some(text.as_str()));
        }
    }
}
