use borsh::BorshDeserialize;
use murmur_types::contact::PeerIdentityRecord;
use tracing::warn;

use crate::error::StorageError;
use crate::traits::{make_key, KvStore};

const CONTACT_PREFIX: &[u8] = b"contact:";

/// Persistent identity records keyed by signing-key fingerprint.
pub struct ContactStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> ContactStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save(&self, fingerprint: &str, record: &PeerIdentityRecord) -> Result<(), StorageError> {
        let value = borsh::to_vec(record).map_err(|e| StorageError::SerializationError {
            reason: e.to_string(),
        })?;
        self.store.put(&make_key(CONTACT_PREFIX, fingerprint), &value)
    }

    pub fn load(&self, fingerprint: &str) -> Result<Option<PeerIdentityRecord>, StorageError> {
        match self.store.get(&make_key(CONTACT_PREFIX, fingerprint))? {
            Some(bytes) => {
                let record = PeerIdentityRecord::try_from_slice(&bytes).map_err(|e| {
                    StorageError::DeserializationError {
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&self, fingerprint: &str) -> Result<(), StorageError> {
        self.store.delete(&make_key(CONTACT_PREFIX, fingerprint))
    }

    /// Every stored record. Undecodable entries are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<(String, PeerIdentityRecord)>, StorageError> {
        let mut records = Vec::new();
        for (key, value) in self.store.prefix_scan(CONTACT_PREFIX)? {
            let fingerprint = String::from_utf8_lossy(&key[CONTACT_PREFIX.len()..]).into_owned();
            match PeerIdentityRecord::try_from_slice(&value) {
                Ok(record) => records.push((fingerprint, record)),
                Err(e) => warn!(%fingerprint, error = %e, "skipping corrupt contact record"),
            }
        }
        Ok(records)
    }
}
