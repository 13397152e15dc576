use std::collections::HashMap;
use std::sync::Arc;

use murmur_crypto::envelope::Provenance;
use murmur_crypto::hash::key_fingerprint;
use murmur_storage::contact_store::ContactStore;
use murmur_storage::traits::KvStore;
use murmur_types::contact::PeerIdentityRecord;
use murmur_types::message::ChatMessage;
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// Identities learned from verified messages, keyed by key fingerprint.
///
/// Records are created on the first verified message from a key and
/// promoted to contacts by [`ContactBook::register`]. When a store is
/// attached every change is written through; a failed write is logged and
/// the in-memory record kept.
#[derive(Default)]
pub struct ContactBook {
    records: HashMap<String, PeerIdentityRecord>,
    store: Option<ContactStore<Arc<dyn KvStore>>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every record from `store` and write through to it from now on.
    pub fn with_store(store: ContactStore<Arc<dyn KvStore>>) -> Result<Self, RelayError> {
        let records: HashMap<_, _> = store.load_all()?.into_iter().collect();
        info!(count = records.len(), "contact book loaded");
        Ok(Self {
            records,
            store: Some(store),
        })
    }

    /// Record what `message` tells us about its sender.
    ///
    /// Returns `true` when the message may be an impersonation: an unsigned
    /// message, or one signed by a different key, using the nickname of a
    /// registered contact. Delivery is never blocked.
    pub fn observe(&mut self, message: &ChatMessage, provenance: Provenance) -> bool {
        let nickname = message.nickname.as_str();
        let signer = match (provenance, &message.pubkey) {
            (Provenance::Verified, Some(pubkey)) => Some(key_fingerprint(pubkey)),
            _ => None,
        };

        let warn_contact = self.records.iter().any(|(fingerprint, record)| {
            record.registered
                && record.answers_to(nickname)
                && signer.as_deref() != Some(fingerprint.as_str())
        });
        if warn_contact {
            warn!(%nickname, id = %message.id, "nickname of a registered contact used by another key");
        }

        if let (Some(fingerprint), Some(pubkey)) = (signer, &message.pubkey) {
            self.learn(fingerprint, pubkey, message);
        }
        warn_contact
    }

    fn learn(&mut self, fingerprint: String, pubkey: &str, message: &ChatMessage) {
        let changed = match self.records.get_mut(&fingerprint) {
            Some(record) => {
                let mut changed = record.add_alias(&message.nickname);
                if record.crypto_key.is_none() && message.crypto_key.is_some() {
                    record.crypto_key = message.crypto_key.clone();
                    changed = true;
                }
                if changed {
                    debug!(%fingerprint, nickname = %message.nickname, "identity record updated");
                }
                changed
            }
            None => {
                debug!(%fingerprint, nickname = %message.nickname, "new identity");
                self.records.insert(
                    fingerprint.clone(),
                    PeerIdentityRecord::new(
                        pubkey.to_string(),
                        message.crypto_key.clone(),
                        message.nickname.clone(),
                    ),
                );
                true
            }
        };
        if changed {
            self.persist(&fingerprint);
        }
    }

    /// Mark the identity with `fingerprint` as a trusted contact.
    pub fn register(&mut self, fingerprint: &str) -> Result<PeerIdentityRecord, RelayError> {
        let record = self
            .records
            .get_mut(fingerprint)
            .ok_or_else(|| RelayError::UnknownContact {
                fingerprint: fingerprint.to_string(),
            })?;
        record.registered = true;
        let record = record.clone();
        info!(%fingerprint, nickname = %record.nickname, "contact registered");
        self.persist(fingerprint);
        Ok(record)
    }

    /// Encryption key for `nickname`, preferring registered contacts and
    /// primary nicknames over aliases.
    pub fn crypto_key_for(&self, nickname: &str) -> Option<String> {
        self.records
            .values()
            .filter(|r| r.answers_to(nickname) && r.crypto_key.is_some())
            .max_by_key(|r| (r.registered, r.nickname == nickname))
            .and_then(|r| r.crypto_key.clone())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&PeerIdentityRecord> {
        self.records.get(fingerprint)
    }

    /// All records, ordered by fingerprint.
    pub fn list(&self) -> Vec<(String, PeerIdentityRecord)> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|(f, r)| (f.clone(), r.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self, fingerprint: &str) {
        let (Some(store), Some(record)) = (&self.store, self.records.get(fingerprint)) else {
            return;
        };
        if let Err(e) = store.save(fingerprint, record) {
            warn!(%fingerprint, error = %e, "failed to persist contact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::identity::{Identity, IdentityParams};
    use murmur_storage::memory::MemoryStore;
    use murmur_types::message::MessageContent;

    const PARAMS: IdentityParams = IdentityParams {
        rsa_bits: 1024,
        kdf_iterations: 1000,
    };

    fn signed(identity: &Identity, nickname: &str) -> ChatMessage {
        let mut msg = ChatMessage::new(
            uuid::Uuid::new_v4(),
            1,
            MessageContent::Text("hello".to_string()),
            nickname,
        );
        identity.sign_message(&mut msg);
        msg
    }

    fn unsigned(nickname: &str) -> ChatMessage {
        ChatMessage::new(
            uuid::Uuid::new_v4(),
            1,
            MessageContent::Text("hello".to_string()),
            nickname,
        )
    }

    #[test]
    fn test_first_verified_message_creates_record() {
        let alice = Identity::generate(PARAMS).unwrap();
        let mut book = ContactBook::new();
        assert!(!book.observe(&signed(&alice, "alice"), Provenance::Verified));

        let record = book.get(&alice.fingerprint()).unwrap();
        assert_eq!(record.nickname, "alice");
        assert_eq!(record.crypto_key.as_deref(), Some(alice.crypto_key()));
        assert!(!record.registered);
    }

    #[test]
    fn test_unsigned_messages_teach_nothing() {
        let mut book = ContactBook::new();
        book.observe(&unsigned("alice"), Provenance::Unsigned);
        assert!(book.is_empty());
    }

    #[test]
    fn test_new_nickname_becomes_alias() {
        let alice = Identity::generate(PARAMS).unwrap();
        let mut book = ContactBook::new();
        book.observe(&signed(&alice, "alice"), Provenance::Verified);
        book.observe(&signed(&alice, "ally"), Provenance::Verified);

        let record = book.get(&alice.fingerprint()).unwrap();
        assert_eq!(record.nickname, "alice");
        assert!(record.other_nicknames.contains("ally"));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_impersonation_raises_warning() {
        let alice = Identity::generate(PARAMS).unwrap();
        let mallory = Identity::generate(PARAMS).unwrap();
        let mut book = ContactBook::new();
        book.observe(&signed(&alice, "alice"), Provenance::Verified);

        // Not yet a contact: no warning.
        assert!(!book.observe(&unsigned("alice"), Provenance::Unsigned));

        book.register(&alice.fingerprint()).unwrap();
        assert!(book.observe(&unsigned("alice"), Provenance::Unsigned));
        assert!(book.observe(&signed(&mallory, "alice"), Provenance::Verified));
        assert!(!book.observe(&signed(&alice, "alice"), Provenance::Verified));
        assert!(!book.observe(&unsigned("bob"), Provenance::Unsigned));
    }

    #[test]
    fn test_register_unknown_fingerprint() {
        let mut book = ContactBook::new();
        assert!(matches!(
            book.register("deadbeef"),
            Err(RelayError::UnknownContact { .. })
        ));
    }

    #[test]
    fn test_crypto_key_prefers_registered_contact() {
        let alice = Identity::generate(PARAMS).unwrap();
        let other = Identity::generate(PARAMS).unwrap();
        let mut book = ContactBook::new();
        book.observe(&signed(&other, "alice"), Provenance::Verified);
        book.observe(&signed(&alice, "alice"), Provenance::Verified);
        book.register(&alice.fingerprint()).unwrap();

        assert_eq!(book.crypto_key_for("alice").as_deref(), Some(alice.crypto_key()));
        assert_eq!(book.crypto_key_for("nobody"), None);
    }

    #[test]
    fn test_records_survive_reload() {
        let alice = Identity::generate(PARAMS).unwrap();
        let backend: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        {
            let mut book = ContactBook::with_store(ContactStore::new(backend.clone())).unwrap();
            book.observe(&signed(&alice, "alice"), Provenance::Verified);
            book.register(&alice.fingerprint()).unwrap();
        }
        let book = ContactBook::with_store(ContactStore::new(backend)).unwrap();
        let contacts = book.list();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].0, alice.fingerprint());
        assert!(contacts[0].1.registered);
    }
}
