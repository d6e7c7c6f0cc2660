//! Long-term identity key on disk.
//!
//! One file per client: `<state_dir>/<client_id>.key`, holding the base64 of
//! the 32 secret bytes. Created on first use, loaded on every later run.

use std::{
    fs,
    path::{Path, PathBuf},
};

use cipherpost_crypto::KeyPair;
use cipherpost_proto::b64;
use zeroize::Zeroizing;

use crate::{error::ClientError, state::write_atomically};

/// Loads or creates the private key for one client.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store for `client_id` under `state_dir`.
    pub fn new(state_dir: &Path, client_id: &str) -> Self {
        Self { path: state_dir.join(format!("{client_id}.key")) }
    }

    /// Location of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the key pair, generating and persisting a new one if absent.
    ///
    /// # Errors
    ///
    /// A key file that exists but cannot be read or decoded is an error:
    /// replacing it would silently change the client's identity.
    pub fn load_or_create(&self) -> Result<KeyPair, ClientError> {
        match fs::read_to_string(&self.path) {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let secret = Zeroizing::new(
                    b64::decode(encoded.trim())
                        .map_err(|e| ClientError::storage(&self.path, e))?,
                );
                let keys = KeyPair::from_secret_bytes(&secret)
                    .map_err(|e| ClientError::storage(&self.path, e))?;

                tracing::debug!(path = %self.path.display(), "identity key loaded");
                Ok(keys)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keys = KeyPair::generate();
                let encoded = Zeroizing::new(b64::encode(&*keys.secret_bytes()));
                write_atomically(&self.path, encoded.as_bytes())?;
                restrict_permissions(&self.path)?;

                tracing::info!(path = %self.path.display(), "new identity key generated");
                Ok(keys)
            },
            Err(e) => Err(ClientError::storage(&self.path, e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ClientError> {
    use std::os::unix::fs::PermissionsExt as _;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| ClientError::storage(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ClientError> {
    Ok(())
}
