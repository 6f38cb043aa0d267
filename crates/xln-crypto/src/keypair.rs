use pqcrypto_dilithium::dilithium2;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{PublicKey as KemPublicKey, SecretKey as KemSecretKey};
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use xln_core::{DilithiumPublicKey, DilithiumSignature, KyberPublicKey};

/// A signer's Dilithium2 keypair.
///
/// The secret key is wiped on drop.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: DilithiumPublicKey,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh Dilithium2 keypair. Node-side only; nothing inside
    /// the deterministic tick may mint keys.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        Self {
            public_key: DilithiumPublicKey(pk.as_bytes().to_vec()),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> DilithiumSignature {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::sign::sign(&sk, message).expect("sign with valid secret key is infallible")
    }

    /// Restore from raw bytes (loaded from the signer directory file).
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        Self { public_key: DilithiumPublicKey(pk_bytes), secret_key: sk_bytes }
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({}b pk)", self.public_key.0.len())
    }
}

/// An entity's Kyber768 encapsulation keypair; the public half is gossiped
/// so senders can seal onion layers toward this entity.
#[derive(Serialize, Deserialize)]
pub struct EncryptionKeyPair {
    pub public_key: KyberPublicKey,
    secret_key: Vec<u8>,
}

impl EncryptionKeyPair {
    pub fn generate() -> Self {
        let (pk, sk) = kyber768::keypair();
        Self {
            public_key: KyberPublicKey(pk.as_bytes().to_vec()),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        Self { public_key: KyberPublicKey(pk_bytes), secret_key: sk_bytes }
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for EncryptionKeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKeyPair({}b pk)", self.public_key.0.len())
    }
}
