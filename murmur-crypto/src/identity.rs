use murmur_types::error::MurmurError;
use murmur_types::message::{signing_payload, ChatMessage};
use murmur_types::primitives::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::encryption::{self, EncryptionKeypair, DEFAULT_RSA_BITS};
use crate::hash::key_fingerprint;
use crate::keys::SigningKeypair;
use crate::sealing::{self, DEFAULT_KDF_ITERATIONS};

/// Where wrapped key blobs live. Keyed by a user-chosen account label.
pub trait KeyStorage: Send + Sync {
    fn get_keys(&self, account: &str) -> Result<Option<String>, MurmurError>;
    fn set_keys(&self, account: &str, blob: &str) -> Result<(), MurmurError>;
}

/// Knobs for key generation and wrapping.
#[derive(Debug, Clone, Copy)]
pub struct IdentityParams {
    pub rsa_bits: usize,
    pub kdf_iterations: u32,
}

impl Default for IdentityParams {
    fn default() -> Self {
        Self {
            rsa_bits: DEFAULT_RSA_BITS,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPair {
    public_key: String,
    private_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeys {
    sign_key_pair: StoredPair,
    crypto_key_pair: StoredPair,
}

/// The local node's signing and encryption keys. Read-only once loaded.
pub struct Identity {
    signing: SigningKeypair,
    encryption: EncryptionKeypair,
}

impl Identity {
    /// Generate fresh keys without persisting them.
    pub fn generate(params: IdentityParams) -> Result<Self, MurmurError> {
        Ok(Self {
            signing: SigningKeypair::generate()?,
            encryption: EncryptionKeypair::generate(params.rsa_bits)?,
        })
    }

    /// Unlock the identity stored under `account`, or create and store one.
    pub fn load_or_create(
        storage: &dyn KeyStorage,
        account: &str,
        password: &str,
        params: IdentityParams,
    ) -> Result<Self, MurmurError> {
        if let Some(blob) = storage.get_keys(account)? {
            let identity = Self::unseal(&blob, password)?;
            info!(account, fingerprint = %identity.fingerprint(), "identity unlocked");
            return Ok(identity);
        }

        let identity = Self::generate(params)?;
        let blob = identity.seal(password, params.kdf_iterations)?;
        storage.set_keys(account, &blob)?;
        info!(account, fingerprint = %identity.fingerprint(), "identity created");
        Ok(identity)
    }

    fn seal(&self, password: &str, iterations: u32) -> Result<String, MurmurError> {
        let signing_private = self.signing.to_pkcs8_base64()?;
        let crypto_private = self.encryption.to_pkcs8_base64()?;
        let stored = StoredKeys {
            sign_key_pair: StoredPair {
                public_key: self.signing.public_key().to_string(),
                private_key: signing_private.to_string(),
            },
            crypto_key_pair: StoredPair {
                public_key: self.encryption.public_key().to_string(),
                private_key: crypto_private.to_string(),
            },
        };
        let json = Zeroizing::new(serde_json::to_vec(&stored).map_err(|e| {
            MurmurError::SerializationError {
                reason: e.to_string(),
            }
        })?);
        sealing::seal(&json, password, iterations)
    }

    fn unseal(blob: &str, password: &str) -> Result<Self, MurmurError> {
        let plain = sealing::open(blob, password)?;
        let stored: StoredKeys =
            serde_json::from_slice(&plain).map_err(|e| MurmurError::StorageCorrupt {
                reason: e.to_string(),
            })?;
        let signing = SigningKeypair::from_pkcs8_base64(&stored.sign_key_pair.private_key)
            .map_err(as_corrupt)?;
        let encryption = EncryptionKeypair::from_pkcs8_base64(&stored.crypto_key_pair.private_key)
            .map_err(as_corrupt)?;
        if signing.public_key() != stored.sign_key_pair.public_key
            || encryption.public_key() != stored.crypto_key_pair.public_key
        {
            return Err(MurmurError::StorageCorrupt {
                reason: "stored public key does not match private key".to_string(),
            });
        }
        Ok(Self {
            signing,
            encryption,
        })
    }

    /// Base64 SPKI of the signing key.
    pub fn public_key(&self) -> &str {
        self.signing.public_key()
    }

    /// Base64 SPKI of the encryption key.
    pub fn crypto_key(&self) -> &str {
        self.encryption.public_key()
    }

    /// Contact-book key of this identity.
    pub fn fingerprint(&self) -> String {
        key_fingerprint(self.public_key())
    }

    /// Sign the concatenation of the four envelope fields.
    pub fn sign(&self, id: &str, payload: &str, timestamp: Timestamp, nickname: &str) -> String {
        self.signing
            .sign(&signing_payload(id, payload, timestamp, nickname))
    }

    /// Sign `message` in place and attach both public keys.
    pub fn sign_message(&self, message: &mut ChatMessage) {
        let id = message.id.to_string();
        message.signature = Some(self.sign(
            &id,
            message.content.signed_text(),
            message.timestamp,
            &message.nickname,
        ));
        message.pubkey = Some(self.public_key().to_string());
        message.crypto_key = Some(self.crypto_key().to_string());
    }

    /// Encrypt for the holder of `recipient` (base64 SPKI).
    pub fn encrypt_for(&self, content: &str, recipient: &str) -> Result<String, MurmurError> {
        encryption::encrypt_for(content, recipient)
    }

    /// Decrypt a payload addressed to this identity.
    pub fn decrypt_with_local_key(&self, ciphertext: &str) -> Result<String, MurmurError> {
        self.encryption.decrypt(ciphertext)
    }
}

fn as_corrupt(e: MurmurError) -> MurmurError {
    MurmurError::StorageCorrupt {
        reason: e.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub(crate) const FAST_PARAMS: IdentityParams = IdentityParams {
        rsa_bits: 1024,
        kdf_iterations: 1000,
    };

    #[derive(Default)]
    struct MapStorage(Mutex<HashMap<String, String>>);

    impl KeyStorage for MapStorage {
        fn get_keys(&self, account: &str) -> Result<Option<String>, MurmurError> {
            Ok(self.0.lock().unwrap().get(account).cloned())
        }

        fn set_keys(&self, account: &str, blob: &str) -> Result<(), MurmurError> {
            self.0
                .lock()
                .unwrap()
                .insert(account.to_string(), blob.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_create_then_load_same_keys() {
        let storage = MapStorage::default();
        let first = Identity::load_or_create(&storage, "alice", "pw", FAST_PARAMS).unwrap();
        let second = Identity::load_or_create(&storage, "alice", "pw", FAST_PARAMS).unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.crypto_key(), second.crypto_key());
    }

    #[test]
    fn test_wrong_password_fails() {
        let storage = MapStorage::default();
        Identity::load_or_create(&storage, "alice", "pw", FAST_PARAMS).unwrap();
        let result = Identity::load_or_create(&storage, "alice", "nope", FAST_PARAMS);
        assert!(matches!(result, Err(MurmurError::DecryptionFailed { .. })));
    }

    #[test]
    fn test_corrupt_blob() {
        let storage = MapStorage::default();
        storage.set_keys("bob", "garbage").unwrap();
        let result = Identity::load_or_create(&storage, "bob", "pw", FAST_PARAMS);
        assert!(matches!(result, Err(MurmurError::StorageCorrupt { .. })));
    }

    #[test]
    fn test_accounts_are_independent() {
        let storage = MapStorage::default();
        let a = Identity::load_or_create(&storage, "a", "pw", FAST_PARAMS).unwrap();
        let b = Identity::load_or_create(&storage, "b", "pw", FAST_PARAMS).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_encrypt_for_self() {
        let identity = Identity::generate(FAST_PARAMS).unwrap();
        let ct = identity.encrypt_for("psst", identity.crypto_key()).unwrap();
        assert_eq!(identity.decrypt_with_local_key(&ct).unwrap(), "psst");
    }
}
