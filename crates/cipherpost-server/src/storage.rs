//! Key directory persistence.
//!
//! The directory is the only relay state that must survive a restart.
//! Mailboxes and groups live in memory and are lost with the process.
//!
//! # Implementations
//!
//! - [`MemoryStorage`]: volatile, for tests and throwaway relays
//! - [`FileStorage`]: a JSON map of `client_id -> base64 key`, rewritten
//!   through a temp file and renamed into place on every publish

use std::{
    collections::BTreeMap,
    fs,
    io::Write as _,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use cipherpost_crypto::PublicKey;
use cipherpost_proto::b64;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem access failed.
    #[error("storage io error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Stored data could not be parsed.
    #[error("corrupt directory file {path}: {reason}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

/// Durable backing for the key directory.
///
/// Implementations must be safe to call from many connection tasks at once.
/// A successful `store_key` must be visible to `load_keys` after a restart.
pub trait Storage: Send + Sync {
    /// Load every published key.
    fn load_keys(&self) -> Result<BTreeMap<String, PublicKey>, StorageError>;

    /// Persist one key, replacing any previous key for `client_id`.
    fn store_key(&self, client_id: &str, key: &PublicKey) -> Result<(), StorageError>;
}

/// In-memory storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    keys: Mutex<BTreeMap<String, PublicKey>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load_keys(&self) -> Result<BTreeMap<String, PublicKey>, StorageError> {
        Ok(self.keys.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn store_key(&self, client_id: &str, key: &PublicKey) -> Result<(), StorageError> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).insert(client_id.to_string(), *key);
        Ok(())
    }
}

/// JSON file storage.
///
/// The whole map is kept in memory and rewritten on each store. A crash
/// mid-write leaves either the old file or the new one, never a torn one.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or prepare to create) the directory file at `path`.
    ///
    /// A missing file is an empty directory. An unreadable or malformed one is
    /// an error: silently starting empty would drop every published key.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<BTreeMap<String, String>>(&raw).map_err(|e| {
                StorageError::Corrupt { path: path.clone(), reason: e.to_string() }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened key directory file");
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    /// Location of the directory file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io { path: self.path.clone(), source };

        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Corrupt { path: self.path.clone(), reason: e.to_string() })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }
}

impl Storage for FileStorage {
    fn load_keys(&self) -> Result<BTreeMap<String, PublicKey>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        entries
            .iter()
            .map(|(client_id, encoded)| {
                let key = b64::decode(encoded)
                    .ok()
                    .and_then(|raw| PublicKey::from_bytes(&raw).ok())
                    .ok_or_else(|| StorageError::Corrupt {
                        path: self.path.clone(),
                        reason: format!("bad key for {client_id}"),
                    })?;
                Ok((client_id.clone(), key))
            })
            .collect()
    }

    fn store_key(&self, client_id: &str, key: &PublicKey) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = entries.clone();
        next.insert(client_id.to_string(), b64::encode(key.as_bytes()));
        self.write_atomically(&next)?;

        *entries = next;
        Ok(())
    }
}
