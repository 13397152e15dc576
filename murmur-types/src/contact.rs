use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// What this node has learned about a signing key.
///
/// Keyed by the fingerprint of `pubkey`. Created on the first verified
/// message from that key, promoted to a contact once `registered` is set.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentityRecord {
    pub pubkey: String,
    pub crypto_key: Option<String>,
    pub nickname: String,
    pub other_nicknames: BTreeSet<String>,
    pub registered: bool,
}

impl PeerIdentityRecord {
    pub fn new(pubkey: String, crypto_key: Option<String>, nickname: String) -> Self {
        Self {
            pubkey,
            crypto_key,
            nickname,
            other_nicknames: BTreeSet::new(),
            registered: false,
        }
    }

    /// Whether the record is known under `nickname`, primary or alias.
    pub fn answers_to(&self, nickname: &str) -> bool {
        self.nickname == nickname || self.other_nicknames.contains(nickname)
    }

    /// Record `nickname` as an alias. Returns `true` if it was new.
    pub fn add_alias(&mut self, nickname: &str) -> bool {
        if self.answers_to(nickname) {
            return false;
        }
        self.other_nicknames.insert(nickname.to_string())
    }
}
