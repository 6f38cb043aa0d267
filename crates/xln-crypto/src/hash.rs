use xln_core::{Hash32, Secret};

/// keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash32 {
    Hash32::from_bytes(xln_codec::keccak_bytes(data))
}

/// Hashlock binding for a payment secret: `keccak(secret)`.
pub fn hashlock_of(secret: &Secret) -> Hash32 {
    keccak256(secret.as_bytes())
}

/// BLAKE3 over arbitrary bytes. Non-consensus identifiers only (relay
/// message ids, snapshot checksums); everything consensus-visible is keccak.
pub fn blake3_id(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashlock_is_keccak_of_secret() {
        let secret = Secret::from_bytes([7u8; 32]);
        assert_eq!(hashlock_of(&secret), keccak256(&[7u8; 32]));
        assert_ne!(hashlock_of(&secret), keccak256(&[8u8; 32]));
    }
}
