//! QUIC connection to a remote relay.
//!
//! One connection is kept open and reused; every request gets a fresh
//! bidirectional stream, so a broken request never poisons the next one. A
//! failed connection is dropped and re-established on the next call.

use std::{fs::File, io::BufReader, net::SocketAddr, path::Path, sync::Arc};

use async_trait::async_trait;
use cipherpost_proto::{MAX_LINE_BYTES, Request, Response, decode_response, encode_line};
use quinn::{Connection, Endpoint};
use rustls::{RootCertStore, pki_types::CertificateDer};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt},
    sync::Mutex,
};

use crate::{api::RelayApi, error::ClientError};

/// Relay reached over QUIC.
#[derive(Debug)]
pub struct QuicRelay {
    endpoint: Endpoint,
    remote: SocketAddr,
    server_name: String,
    connection: Mutex<Option<Connection>>,
}

impl QuicRelay {
    /// Prepare a client for the relay at `remote`, verified as `server_name`
    /// against `roots`. No connection is made until the first call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        remote: SocketAddr,
        server_name: impl Into<String>,
        roots: RootCertStore,
    ) -> Result<Self, ClientError> {
        let config = quinn::ClientConfig::with_root_certificates(Arc::new(roots))
            .map_err(|e| ClientError::InvalidState { reason: format!("TLS setup failed: {e}") })?;

        let bind: SocketAddr = if remote.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };
        let mut endpoint =
            Endpoint::client(bind).map_err(transport_error)?;
        endpoint.set_default_client_config(config);

        Ok(Self { endpoint, remote, server_name: server_name.into(), connection: Mutex::new(None) })
    }

    async fn connection(&self) -> Result<Connection, ClientError> {
        let mut slot = self.connection.lock().await;

        if let Some(conn) = slot.as_ref().filter(|conn| conn.close_reason().is_none()) {
            return Ok(conn.clone());
        }

        let conn = self
            .endpoint
            .connect(self.remote, &self.server_name)
            .map_err(transport_error)?
            .await
            .map_err(transport_error)?;

        tracing::debug!(remote = %self.remote, "connected to relay");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn exchange(&self, conn: &Connection, line: &[u8]) -> Result<Response, ClientError> {
        let (mut send, recv) = conn.open_bi().await.map_err(transport_error)?;
        send.write_all(line).await.map_err(transport_error)?;
        send.finish().map_err(transport_error)?;

        let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
        let mut reader = tokio::io::BufReader::new(recv.take(limit));
        let mut reply = String::new();
        let read = reader.read_line(&mut reply).await.map_err(transport_error)?;
        if read == 0 {
            return Err(ClientError::Transport("relay closed the stream without replying".to_string()));
        }
        if !reply.ends_with('\n') {
            return Err(ClientError::Transport(format!(
                "relay response truncated after {read} bytes"
            )));
        }

        Ok(decode_response(&reply)?)
    }

    /// Close the connection and the endpoint.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close(0u32.into(), b"client closing");
        }
        self.endpoint.wait_idle().await;
    }
}

#[async_trait]
impl RelayApi for QuicRelay {
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let line = encode_line(&request)?;
        let conn = self.connection().await?;

        match self.exchange(&conn, &line).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_retryable() {
                    self.connection.lock().await.take();
                }
                tracing::debug!(request = %request.kind(), error = %err, "relay call failed");
                Err(err)
            },
        }
    }
}

fn transport_error(err: impl std::fmt::Display) -> ClientError {
    ClientError::Transport(err.to_string())
}

/// Trust anchors from a PEM file of CA certificates.
pub fn load_ca_pem(path: &Path) -> Result<RootCertStore, ClientError> {
    let file = File::open(path).map_err(|e| ClientError::storage(path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::storage(path, e))?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ClientError::storage(path, "no usable CA certificate"));
    }
    Ok(roots)
}

/// Trust exactly one certificate, given as DER.
///
/// For pinning a relay's self-signed development certificate.
pub fn root_from_der(der: &[u8]) -> Result<RootCertStore, ClientError> {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(der.to_vec()))
        .map_err(|e| ClientError::InvalidState { reason: format!("bad certificate: {e}") })?;
    Ok(roots)
}
