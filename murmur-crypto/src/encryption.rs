use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use murmur_types::error::MurmurError;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Modulus size used for new identities.
pub const DEFAULT_RSA_BITS: usize = 4096;

/// OAEP overhead for SHA-256: two digests plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// RSA-OAEP (SHA-256) keypair used for end-to-end encryption.
pub struct EncryptionKeypair {
    private: RsaPrivateKey,
    public_b64: String,
}

impl EncryptionKeypair {
    /// Generate a fresh keypair with a `bits`-bit modulus.
    pub fn generate(bits: usize) -> Result<Self, MurmurError> {
        let private =
            RsaPrivateKey::new(&mut rand::rngs::OsRng, bits).map_err(|e| invalid_key(&e))?;
        Self::from_private(private)
    }

    /// Restore a keypair from base64 PKCS#8 DER.
    pub fn from_pkcs8_base64(encoded: &str) -> Result<Self, MurmurError> {
        let der = Zeroizing::new(BASE64.decode(encoded).map_err(|e| invalid_key(&e))?);
        let private = RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| invalid_key(&e))?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, MurmurError> {
        let spki = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| invalid_key(&e))?;
        Ok(Self {
            public_b64: BASE64.encode(spki.as_bytes()),
            private,
        })
    }

    /// Base64 PKCS#8 DER of the private key.
    pub fn to_pkcs8_base64(&self) -> Result<Zeroizing<String>, MurmurError> {
        let der = self.private.to_pkcs8_der().map_err(|e| invalid_key(&e))?;
        Ok(Zeroizing::new(BASE64.encode(der.as_bytes())))
    }

    /// Base64 SPKI DER of the public key, as carried in `cryptoKey`.
    pub fn public_key(&self) -> &str {
        &self.public_b64
    }

    /// Decrypt a base64 ciphertext produced by [`encrypt_for`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, MurmurError> {
        let raw = BASE64.decode(ciphertext).map_err(|e| decryption_failed(&e))?;
        let block = self.private.size();
        if raw.is_empty() || raw.len() % block != 0 {
            return Err(MurmurError::DecryptionFailed {
                reason: format!("ciphertext length {} is not a multiple of {block}", raw.len()),
            });
        }
        let mut plaintext = Zeroizing::new(Vec::with_capacity(raw.len()));
        for chunk in raw.chunks(block) {
            let part = self
                .private
                .decrypt(Oaep::new::<Sha256>(), chunk)
                .map_err(|e| decryption_failed(&e))?;
            plaintext.extend_from_slice(&part);
        }
        String::from_utf8(plaintext.to_vec()).map_err(|e| decryption_failed(&e))
    }
}

/// Encrypt `plaintext` for the holder of the base64 SPKI `recipient` key.
///
/// Inputs longer than one OAEP block are split and each block is encrypted
/// separately; the result is base64 of the concatenated blocks.
pub fn encrypt_for(plaintext: &str, recipient: &str) -> Result<String, MurmurError> {
    let der = BASE64.decode(recipient).map_err(|e| invalid_key(&e))?;
    let public = RsaPublicKey::from_public_key_der(&der).map_err(|e| invalid_key(&e))?;
    let max_chunk = public
        .size()
        .checked_sub(OAEP_SHA256_OVERHEAD)
        .filter(|n| *n > 0)
        .ok_or_else(|| MurmurError::InvalidKeyMaterial {
            reason: "modulus too small for OAEP-SHA256".to_string(),
        })?;

    let mut rng = rand::rngs::OsRng;
    let bytes = plaintext.as_bytes();
    // An empty payload still produces one block so decrypt has something to open.
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![bytes]
    } else {
        bytes.chunks(max_chunk).collect()
    };
    let mut out = Vec::with_capacity(chunks.len() * public.size());
    for chunk in chunks {
        let block = public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
            .map_err(|e| MurmurError::EncryptionFailed {
                reason: e.to_string(),
            })?;
        out.extend_from_slice(&block);
    }
    Ok(BASE64.encode(out))
}

fn invalid_key(e: &dyn std::fmt::Display) -> MurmurError {
    MurmurError::InvalidKeyMaterial {
        reason: e.to_string(),
    }
}

fn decryption_failed(e: &dyn std::fmt::Display) -> MurmurError {
    MurmurError::DecryptionFailed {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small moduli keep key generation fast; chunking behaves the same.
    const TEST_BITS: usize = 1024;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let kp = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let ct = encrypt_for("meet at noon", kp.public_key()).unwrap();
        assert_eq!(kp.decrypt(&ct).unwrap(), "meet at noon");
    }

    #[test]
    fn test_long_payload_is_chunked() {
        let kp = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let long = "x".repeat(500);
        let ct = encrypt_for(&long, kp.public_key()).unwrap();
        let raw = BASE64.decode(&ct).unwrap();
        // 1024-bit modulus: 128-byte blocks carrying up to 62 bytes each.
        assert_eq!(raw.len(), 128 * 9);
        assert_eq!(kp.decrypt(&ct).unwrap(), long);
    }

    #[test]
    fn test_empty_payload() {
        let kp = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let ct = encrypt_for("", kp.public_key()).unwrap();
        assert_eq!(kp.decrypt(&ct).unwrap(), "");
    }

    #[test]
    fn test_other_key_cannot_decrypt() {
        let alice = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let eve = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let ct = encrypt_for("secret", alice.public_key()).unwrap();
        assert!(matches!(
            eve.decrypt(&ct),
            Err(MurmurError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_pkcs8_roundtrip() {
        let kp = EncryptionKeypair::generate(TEST_BITS).unwrap();
        let restored =
            EncryptionKeypair::from_pkcs8_base64(&kp.to_pkcs8_base64().unwrap()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
        let ct = encrypt_for("hi", kp.public_key()).unwrap();
        assert_eq!(restored.decrypt(&ct).unwrap(), "hi");
    }

    #[test]
    fn test_garbage_ciphertext() {
        let kp = EncryptionKeypair::generate(TEST_BITS).unwrap();
        assert!(kp.decrypt("not base64!").is_err());
        assert!(kp.decrypt(&BASE64.encode([1u8; 7])).is_err());
    }
}
