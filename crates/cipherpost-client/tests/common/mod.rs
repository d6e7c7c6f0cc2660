//! Shared fixtures: an in-process relay and a controllable clock.

#![allow(dead_code, clippy::unwrap_used)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cipherpost_client::{
    ClientConfig, ClientError, ClientSession, Environment, RelayApi, SystemEnv,
};
use cipherpost_proto::{Request, Response, decode_response, encode_line};
use cipherpost_server::{MemoryStorage, RelayService};

/// Relay reached through the same JSON-line encoding as the network path,
/// minus the network.
#[derive(Clone)]
pub struct LocalRelay {
    relay: Arc<RelayService>,
    offline: Arc<AtomicBool>,
}

impl LocalRelay {
    pub fn new() -> Self {
        let relay = RelayService::open(Box::new(MemoryStorage::new())).unwrap();
        Self { relay: Arc::new(relay), offline: Arc::new(AtomicBool::new(false)) }
    }

    pub fn service(&self) -> &RelayService {
        &self.relay
    }

    /// Make every call fail as a transport error until turned back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayApi for LocalRelay {
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("relay unreachable".to_string()));
        }

        let line = String::from_utf8(encode_line(&request)?).unwrap();
        let reply = self.relay.handle_line(&line);
        let encoded = String::from_utf8(encode_line(&reply.response)?).unwrap();
        Ok(decode_response(&encoded)?)
    }
}

/// Clock that only moves when told to, with real randomness.
#[derive(Clone, Default)]
pub struct TestEnv {
    now: Arc<AtomicU64>,
}

impl TestEnv {
    pub fn at(millis: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(millis)) }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        SystemEnv.random_bytes(buffer);
    }
}

pub type Session = ClientSession<LocalRelay, TestEnv>;

/// Open a session and publish its key.
pub async fn start(dir: &Path, client_id: &str, relay: &LocalRelay, env: &TestEnv) -> Session {
    let config = ClientConfig::new(client_id).with_state_dir(dir);
    ClientSession::start(config, relay.clone(), env.clone()).await.unwrap()
}
