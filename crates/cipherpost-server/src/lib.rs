//! Cipherpost relay server.
//!
//! A store-and-forward relay for end-to-end encrypted messages. The relay
//! holds public keys, group membership and per-recipient mailboxes; it never
//! sees a private key or a plaintext.
//!
//! ## Architecture
//!
//! ```text
//! cipherpost-server
//!   ├─ QuinnTransport     (QUIC via Quinn)
//!   ├─ serve_stream       (JSON-line loop per stream)
//!   └─ RelayService       (request -> response)
//!        ├─ KeyDirectory  (durable, via Storage)
//!        ├─ GroupRegistry (volatile)
//!        ├─ Mailbox       (volatile)
//!        └─ SessionRegistry
//! ```
//!
//! Only the key directory survives a restart. Undelivered mailbox entries
//! and registered groups are lost with the process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod directory;
mod error;
mod groups;
mod mailbox;
mod registry;
mod relay;
pub mod storage;
mod transport;

use std::{path::PathBuf, sync::Arc};

pub use connection::{StreamEnd, serve_stream};
pub use directory::{DirectoryError, KeyDirectory};
pub use error::ServerError;
pub use groups::{Group, GroupError, GroupRegistry};
pub use mailbox::Mailbox;
pub use registry::SessionRegistry;
pub use relay::{RelayError, RelayService, Reply};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use transport::QuinnTransport;
use tokio::io::BufReader;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<PathBuf>,
    /// Key directory file. `None` keeps keys in memory only.
    pub directory_path: Option<PathBuf>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            directory_path: None,
        }
    }
}

/// Production Cipherpost relay.
///
/// Wraps `RelayService` with Quinn QUIC transport.
pub struct Server {
    /// Shared relay state
    relay: Arc<RelayService>,
    /// QUIC endpoint
    transport: QuinnTransport,
}

impl Server {
    /// Open the key directory and bind the endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The key directory file cannot be read or parsed
    /// - Binding to the address fails
    /// - TLS configuration is invalid
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let storage: Box<dyn Storage> = match &config.directory_path {
            Some(path) => Box::new(FileStorage::open(path)?),
            None => {
                tracing::warn!("No directory file configured - published keys are lost on restart");
                Box::new(MemoryStorage::new())
            },
        };
        let relay = Arc::new(RelayService::open(storage)?);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { relay, transport })
    }

    /// Run the server, accepting connections until the endpoint closes.
    ///
    /// A failing connection is logged and dropped; it never stops the loop.
    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        while let Some(incoming) = self.transport.accept().await {
            let relay = Arc::clone(&self.relay);

            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => handle_connection(conn, relay).await,
                    Err(e) => tracing::debug!("Handshake failed: {}", e),
                }
            });
        }

        tracing::info!("Endpoint closed, server stopping");
        Ok(())
    }

    /// Stop accepting connections. `run` returns once the endpoint drains.
    pub fn shutdown(&self) {
        self.transport.close();
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// DER of the certificate presented to clients.
    pub fn certificate_der(&self) -> &[u8] {
        self.transport.certificate().as_ref()
    }

    /// Shared relay state.
    pub fn relay(&self) -> &Arc<RelayService> {
        &self.relay
    }
}

/// Handle a single QUIC connection.
async fn handle_connection(conn: quinn::Connection, relay: Arc<RelayService>) {
    let conn_id = {
        let mut buf = [0u8; 8];
        if let Err(e) = getrandom::fill(&mut buf) {
            tracing::error!("getrandom failed: {}", e);
        }
        u64::from_le_bytes(buf)
    };

    tracing::debug!(conn_id, remote = %conn.remote_address(), "New connection");

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let relay = Arc::clone(&relay);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(conn_id, send, recv, &relay).await {
                        tracing::debug!(conn_id, "Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!(conn_id, "Connection closed: {}", e);
                break;
            },
        }
    }
}

/// Handle a single bidirectional stream.
async fn handle_stream(
    conn_id: u64,
    mut send: quinn::SendStream,
    recv: quinn::RecvStream,
    relay: &RelayService,
) -> Result<(), ServerError> {
    let (end, answered) = serve_stream(relay, BufReader::new(recv), &mut send).await?;

    send.finish().map_err(|e| ServerError::Transport(e.to_string()))?;
    tracing::trace!(conn_id, ?end, answered, "Stream finished");

    Ok(())
}
