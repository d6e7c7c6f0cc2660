//! Wire-protocol tests over in-memory streams.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use cipherpost_crypto::PublicKey;
use cipherpost_proto::{MailboxEntry, Request, Response, b64, decode_response, encode_line};
use cipherpost_server::{MemoryStorage, RelayService, StreamEnd, serve_stream};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf},
    task::JoinHandle,
};

struct TestConn {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<StreamEnd>,
}

impl TestConn {
    fn open(relay: &Arc<RelayService>) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let relay = Arc::clone(relay);

        let server = tokio::spawn(async move {
            let (end, _) =
                serve_stream(&relay, BufReader::new(server_read), server_write).await.unwrap();
            end
        });

        let (client_read, writer) = tokio::io::split(client);
        Self { lines: BufReader::new(client_read).lines(), writer, server }
    }

    async fn raw(&mut self, line: &str) -> Response {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let reply = self.lines.next_line().await.unwrap().unwrap();
        decode_response(&reply).unwrap()
    }

    async fn call(&mut self, request: &Request) -> Response {
        self.writer.write_all(&encode_line(request).unwrap()).await.unwrap();
        let reply = self.lines.next_line().await.unwrap().unwrap();
        decode_response(&reply).unwrap()
    }
}

fn relay() -> Arc<RelayService> {
    Arc::new(RelayService::open(Box::new(MemoryStorage::new())).unwrap())
}

fn publish(client_id: &str, byte: u8) -> Request {
    Request::PublishKey { client_id: client_id.to_string(), pubkey: PublicKey::from([byte; 32]) }
}

#[tokio::test]
async fn publish_then_get_key_over_the_wire() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    let published = conn.call(&publish("alice", 4)).await;
    assert!(published.is_ok());
    assert_eq!(published.client_id.as_deref(), Some("alice"));

    let line = r#"{"type":"get_key","client_id":"alice"}"#;
    let fetched = conn.raw(line).await;

    assert_eq!(fetched.pubkey, Some(PublicKey::from([4u8; 32])));
    assert_eq!(fetched.client_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn republish_returns_second_key() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    conn.call(&publish("alice", 1)).await;
    conn.call(&publish("alice", 2)).await;

    let fetched = conn.call(&Request::GetKey { client_id: "alice".to_string() }).await;
    assert_eq!(fetched.pubkey, Some(PublicKey::from([2u8; 32])));
}

#[tokio::test]
async fn errors_leave_the_stream_usable() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    let bad = conn.raw("this is not json").await;
    assert!(bad.error_reason().unwrap().starts_with("invalid json"));

    let unknown = conn.raw(r#"{"type":"shout"}"#).await;
    assert_eq!(unknown.error_reason(), Some("unknown type: shout"));

    let missing = conn.raw(r#"{"type":"send_blob","to":"bob"}"#).await;
    assert_eq!(missing.error_reason(), Some("send_blob requires to, from and blob"));

    let bad_key = conn
        .raw(&format!(
            r#"{{"type":"publish_key","client_id":"alice","pubkey":"{}"}}"#,
            b64::encode(&[1u8; 5])
        ))
        .await;
    assert!(bad_key.error_reason().unwrap().starts_with("invalid request"));

    let listing = conn.raw(r#"{"type":"list_all","client_id":"alice"}"#).await;
    assert!(listing.is_ok());
}

#[tokio::test]
async fn fetch_drains_in_order_and_never_blocks() {
    let relay = relay();
    let mut sender = TestConn::open(&relay);
    let mut receiver = TestConn::open(&relay);

    let empty = receiver.call(&Request::FetchBlobs { client_id: "bob".to_string() }).await;
    assert_eq!(empty.messages, Some(vec![]));

    for blob in ["b25l", "dHdv"] {
        let stored = sender
            .call(&Request::SendBlob {
                to: "bob".to_string(),
                from: "alice".to_string(),
                blob: blob.to_string(),
            })
            .await;
        assert_eq!(stored.message.as_deref(), Some("stored"));
    }

    let batch = receiver.call(&Request::FetchBlobs { client_id: "bob".to_string() }).await;
    assert_eq!(
        batch.messages,
        Some(vec![
            MailboxEntry::Private { from: "alice".to_string(), blob: "b25l".to_string() },
            MailboxEntry::Private { from: "alice".to_string(), blob: "dHdv".to_string() },
        ])
    );

    let again = receiver.call(&Request::FetchBlobs { client_id: "bob".to_string() }).await;
    assert_eq!(again.messages, Some(vec![]));
}

#[tokio::test]
async fn group_fan_out_reaches_other_members_only() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    let created = conn
        .call(&Request::CreateGroup {
            group_id: "g1".to_string(),
            members: vec!["bob".to_string(), "carol".to_string()],
            admin: "alice".to_string(),
        })
        .await;
    assert_eq!(created.message.as_deref(), Some("group created"));

    let sent = conn
        .call(&Request::SendGroupBlob {
            group_id: "g1".to_string(),
            from: "alice".to_string(),
            blob: "QUJD".to_string(),
        })
        .await;
    assert_eq!(sent.message.as_deref(), Some("stored for group"));

    let expected = MailboxEntry::Group {
        group_id: "g1".to_string(),
        from: "alice".to_string(),
        blob: "QUJD".to_string(),
    };
    for member in ["bob", "carol"] {
        let batch = conn.call(&Request::FetchBlobs { client_id: member.to_string() }).await;
        assert_eq!(batch.messages, Some(vec![expected.clone()]));
    }

    let own = conn.call(&Request::FetchBlobs { client_id: "alice".to_string() }).await;
    assert_eq!(own.messages, Some(vec![]));
}

#[tokio::test]
async fn non_member_cannot_send_to_group() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    conn.call(&Request::CreateGroup {
        group_id: "g1".to_string(),
        members: vec!["alice".to_string(), "bob".to_string()],
        admin: "alice".to_string(),
    })
    .await;

    let refused = conn
        .call(&Request::SendGroupBlob {
            group_id: "g1".to_string(),
            from: "mallory".to_string(),
            blob: "QUJD".to_string(),
        })
        .await;

    assert_eq!(refused.error_reason(), Some("not a member of this group"));
    assert_eq!(relay.mailbox().total_pending(), 0);
}

#[tokio::test]
async fn disconnect_ends_the_stream() {
    let relay = relay();
    let mut conn = TestConn::open(&relay);

    conn.call(&publish("alice", 1)).await;
    assert!(relay.sessions().is_active("alice"));

    let bye = conn.call(&Request::Disconnect { client_id: "alice".to_string() }).await;
    assert_eq!(bye.message.as_deref(), Some("disconnected"));
    assert!(!relay.sessions().is_active("alice"));

    assert_eq!(conn.server.await.unwrap(), StreamEnd::Disconnected);
    assert!(conn.lines.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_connections_share_state() {
    let relay = relay();

    let tasks: Vec<_> = (0..16u8)
        .map(|i| {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let mut conn = TestConn::open(&relay);
                let response = conn
                    .call(&Request::SendBlob {
                        to: "bob".to_string(),
                        from: format!("sender{i}"),
                        blob: "QUJD".to_string(),
                    })
                    .await;
                assert!(response.is_ok());
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(relay.mailbox().take_all("bob").len(), 16);
}
