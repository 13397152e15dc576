use murmur_crypto::identity::KeyStorage;
use murmur_types::error::MurmurError;

use crate::error::StorageError;
use crate::traits::{make_key, KvStore};

const KEYS_PREFIX: &[u8] = b"keys:";

/// Password-wrapped identity blobs, one per account label.
pub struct KeyStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> KeyStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load the sealed blob stored for `account`.
    pub fn load(&self, account: &str) -> Result<Option<String>, StorageError> {
        match self.store.get(&make_key(KEYS_PREFIX, account))? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::DeserializationError {
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Store the sealed blob for `account`, replacing any previous one.
    pub fn save(&self, account: &str, blob: &str) -> Result<(), StorageError> {
        self.store
            .put(&make_key(KEYS_PREFIX, account), blob.as_bytes())
    }

    /// Account labels that have a stored identity.
    pub fn accounts(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .prefix_scan(KEYS_PREFIX)?
            .into_iter()
            .filter_map(|(k, _)| String::from_utf8(k[KEYS_PREFIX.len()..].to_vec()).ok())
            .collect())
    }
}

impl<S: KvStore> KeyStorage for KeyStore<S> {
    fn get_keys(&self, account: &str) -> Result<Option<String>, MurmurError> {
        Ok(self.load(account)?)
    }

    fn set_keys(&self, account: &str, blob: &str) -> Result<(), MurmurError> {
        Ok(self.save(account, blob)?)
    }
}
