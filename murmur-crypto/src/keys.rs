use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use murmur_types::error::MurmurError;
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use zeroize::Zeroizing;

/// ECDSA P-384 keypair. Signatures use SHA-384.
pub struct SigningKeypair {
    inner: SigningKey,
    public_b64: String,
}

impl SigningKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Result<Self, MurmurError> {
        Self::from_signing_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Restore a keypair from base64 PKCS#8 DER.
    pub fn from_pkcs8_base64(encoded: &str) -> Result<Self, MurmurError> {
        let der = Zeroizing::new(BASE64.decode(encoded).map_err(invalid_key)?);
        let inner = SigningKey::from_pkcs8_der(&der).map_err(invalid_key)?;
        Self::from_signing_key(inner)
    }

    fn from_signing_key(inner: SigningKey) -> Result<Self, MurmurError> {
        let spki = inner
            .verifying_key()
            .to_public_key_der()
            .map_err(invalid_key)?;
        Ok(Self {
            public_b64: BASE64.encode(spki.as_bytes()),
            inner,
        })
    }

    /// Base64 PKCS#8 DER of the private key.
    pub fn to_pkcs8_base64(&self) -> Result<Zeroizing<String>, MurmurError> {
        let der = self.inner.to_pkcs8_der().map_err(invalid_key)?;
        Ok(Zeroizing::new(BASE64.encode(der.as_bytes())))
    }

    /// Base64 SPKI DER of the public key, as carried in `pubkey`.
    pub fn public_key(&self) -> &str {
        &self.public_b64
    }

    /// Sign `message`, returning the base64 raw `r || s` signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let sig: Signature = self.inner.sign(message);
        BASE64.encode(sig.to_bytes())
    }
}

/// Verify a base64 signature against a base64 SPKI public key.
///
/// Malformed keys or signatures are errors; a well-formed signature that
/// does not match yields [`MurmurError::InvalidSignature`].
pub fn verify(message: &[u8], signature: &str, pubkey: &str) -> Result<(), MurmurError> {
    let der = BASE64.decode(pubkey).map_err(invalid_key)?;
    let verifying_key = VerifyingKey::from_public_key_der(&der).map_err(invalid_key)?;
    let raw = BASE64
        .decode(signature)
        .map_err(|_| MurmurError::InvalidSignature)?;
    let sig = Signature::from_slice(&raw).map_err(|_| MurmurError::InvalidSignature)?;
    verifying_key
        .verify(message, &sig)
        .map_err(|_| MurmurError::InvalidSignature)
}

fn invalid_key<E: std::fmt::Display>(e: E) -> MurmurError {
    MurmurError::InvalidKeyMaterial {
        reason: e.to_string(),
    }
}
