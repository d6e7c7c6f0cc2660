//! Key directory: `client_id -> public key`, last write wins.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use cipherpost_crypto::PublicKey;

use crate::storage::{Storage, StorageError};

/// Errors from directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// No key has been published for this identity.
    #[error("no key published for {0}")]
    NotFound(String),

    /// The durable write failed; the directory is unchanged.
    #[error("directory storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Durable directory of published public keys.
///
/// Reads are served from memory. Publishes go to storage first, so a key
/// is never visible to `lookup` unless it would also survive a restart.
pub struct KeyDirectory {
    keys: RwLock<HashMap<String, PublicKey>>,
    storage: Box<dyn Storage>,
}

impl KeyDirectory {
    /// Open a directory over `storage`, loading every persisted key.
    pub fn open(storage: Box<dyn Storage>) -> Result<Self, DirectoryError> {
        let keys: HashMap<_, _> = storage.load_keys()?.into_iter().collect();
        tracing::info!(keys = keys.len(), "key directory loaded");

        Ok(Self { keys: RwLock::new(keys), storage })
    }

    /// Upsert `client_id`'s key.
    ///
    /// Republishing overwrites. Only a storage failure can make this fail.
    pub fn publish(&self, client_id: &str, key: PublicKey) -> Result<(), DirectoryError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);

        self.storage.store_key(client_id, &key)?;
        let previous = keys.insert(client_id.to_string(), key);

        tracing::debug!(client_id, replaced = previous.is_some(), "key published");
        Ok(())
    }

    /// Current key for `client_id`.
    pub fn lookup(&self, client_id: &str) -> Result<PublicKey, DirectoryError> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .copied()
            .ok_or_else(|| DirectoryError::NotFound(client_id.to_string()))
    }

    /// Every identity with a published key, sorted.
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> =
            self.keys.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of published keys.
    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirectory").field("keys", &self.len()).finish_non_exhaustive()
    }
}
