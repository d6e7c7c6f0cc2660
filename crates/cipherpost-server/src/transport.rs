//! QUIC transport.
//!
//! Each accepted connection may open any number of bidirectional streams;
//! every stream carries the newline-delimited request/response protocol.

use std::{fs::File, io::BufReader, net::SocketAddr, path::Path};

use quinn::{Endpoint, Incoming};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::ServerError;

/// Bound QUIC endpoint plus the certificate it presents.
#[derive(Debug)]
pub struct QuinnTransport {
    endpoint: Endpoint,
    certificate: CertificateDer<'static>,
}

impl QuinnTransport {
    /// Bind a QUIC endpoint.
    ///
    /// With both `cert_path` and `key_path`, the PEM files are loaded. With
    /// neither, an ephemeral self-signed certificate for `localhost` is
    /// generated. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Config` if the address is invalid, only one of the paths is given,
    ///   or the PEM files do not contain a usable certificate and key
    /// - `Transport` if the socket cannot be bound
    pub fn bind(
        address: &str,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address {address}: {e}")))?;

        let (chain, key) = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_pem(cert, key)?,
            (None, None) => self_signed()?,
            _ => {
                return Err(ServerError::Config(
                    "certificate and key must be provided together".to_string(),
                ));
            },
        };

        let certificate = chain
            .first()
            .cloned()
            .ok_or_else(|| ServerError::Config("certificate file is empty".to_string()))?;

        let server_config = quinn::ServerConfig::with_single_cert(chain, key)
            .map_err(|e| ServerError::Config(format!("invalid TLS configuration: {e}")))?;

        let endpoint = Endpoint::server(server_config, addr)?;

        Ok(Self { endpoint, certificate })
    }

    /// Wait for the next incoming connection. `None` once the endpoint closes.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// DER of the leaf certificate the relay presents.
    ///
    /// Clients that trust a self-signed relay pin this.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"relay shutting down");
    }
}

fn load_pem(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let open = |path: &Path| {
        File::open(path).map(BufReader::new).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })
    };

    let chain = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("bad certificate PEM: {e}")))?;

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|e| ServerError::Config(format!("bad key PEM: {e}")))?
        .ok_or_else(|| {
            ServerError::Config(format!("no private key in {}", key_path.display()))
        })?;

    Ok((chain, key))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    tracing::warn!("No TLS certificate provided - using self-signed certificate");
    tracing::warn!("This is NOT suitable for production use!");

    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Config(format!("self-signed certificate failed: {e}")))?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![cert.der().clone()], key))
}
