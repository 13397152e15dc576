//! Password-based wrapping of key material at rest.
//!
//! A blob is a JSON object `{version, salt, iterations, iv, cipherText}`:
//! AES-256-GCM under a key derived with PBKDF2-HMAC-SHA256. Blobs written
//! before per-identity salts existed carry only `iv` and `cipherText` and
//! are opened with the historic fixed salt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use murmur_types::error::MurmurError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2 rounds for newly sealed blobs.
pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;

/// Salt used by blobs that predate per-identity salts.
pub const LEGACY_SALT: &[u8] = b"a-unique-salt";

/// PBKDF2 rounds used by blobs that predate per-identity salts.
pub const LEGACY_ITERATIONS: u32 = 1000;

const BLOB_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SealedBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
    iv: String,
    cipher_text: String,
}

/// Encrypt `plaintext` under `password` with a fresh random salt and IV.
pub fn seal(plaintext: &[u8], password: &str, iterations: u32) -> Result<String, MurmurError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| MurmurError::EncryptionFailed {
            reason: e.to_string(),
        })?;

    let blob = SealedBlob {
        version: Some(BLOB_VERSION),
        salt: Some(BASE64.encode(salt)),
        iterations: Some(iterations),
        iv: BASE64.encode(iv),
        cipher_text: BASE64.encode(ciphertext),
    };
    serde_json::to_string(&blob).map_err(|e| MurmurError::SerializationError {
        reason: e.to_string(),
    })
}

/// Decrypt a blob produced by [`seal`] (or a legacy blob).
///
/// An unparsable blob is [`MurmurError::StorageCorrupt`]; a wrong password
/// surfaces as [`MurmurError::DecryptionFailed`].
pub fn open(blob: &str, password: &str) -> Result<Zeroizing<Vec<u8>>, MurmurError> {
    let blob: SealedBlob = serde_json::from_str(blob).map_err(|e| corrupt(&e))?;
    if let Some(version) = blob.version {
        if version != BLOB_VERSION {
            return Err(MurmurError::StorageCorrupt {
                reason: format!("unsupported blob version {version}"),
            });
        }
    }

    let (salt, iterations) = match blob.salt {
        Some(salt) => (
            BASE64.decode(salt).map_err(|e| corrupt(&e))?,
            blob.iterations.unwrap_or(DEFAULT_KDF_ITERATIONS),
        ),
        None => (LEGACY_SALT.to_vec(), LEGACY_ITERATIONS),
    };
    let iv = BASE64.decode(&blob.iv).map_err(|e| corrupt(&e))?;
    if iv.len() != IV_LEN {
        return Err(MurmurError::StorageCorrupt {
            reason: format!("iv must be {IV_LEN} bytes, got {}", iv.len()),
        });
    }
    let ciphertext = BASE64.decode(&blob.cipher_text).map_err(|e| corrupt(&e))?;

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| MurmurError::DecryptionFailed {
            reason: "wrong password or tampered key blob".to_string(),
        })
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn corrupt(e: &dyn std::fmt::Display) -> MurmurError {
    MurmurError::StorageCorrupt {
        reason: e.to_string(),
    }
}
