pub mod hash;
pub mod keypair;
pub mod onion;
pub mod sign;

pub use hash::{blake3_id, hashlock_of, keccak256};
pub use keypair::{EncryptionKeyPair, KeyPair};
pub use onion::{build_onion, peel_envelope, validate_route, OnionError};
pub use sign::{sign, verify_signature, SignatureError};
