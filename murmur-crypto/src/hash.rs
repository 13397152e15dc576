/// Compute the BLAKE3 hash of the given data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute a BLAKE3 hash with domain separation.
pub fn blake3_hash_domain(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Stable identifier of a signing key, as used by the contact book.
///
/// Hashes the base64 SPKI text as it appears on the wire, so two encodings
/// of the same key are treated as different identities.
pub fn key_fingerprint(pubkey: &str) -> String {
    hex::encode(blake3_hash_domain("murmur-contact-fingerprint", pubkey.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash_deterministic() {
        assert_eq!(blake3_hash(b"murmur"), blake3_hash(b"murmur"));
        assert_ne!(blake3_hash(b"murmur"), blake3_hash(b"murmur!"));
    }

    #[test]
    fn test_domain_separation() {
        assert_ne!(
            blake3_hash_domain("a", b"data"),
            blake3_hash_domain("b", b"data")
        );
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let fp = key_fingerprint("MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAE");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, key_fingerprint("MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAE"));
    }
}
