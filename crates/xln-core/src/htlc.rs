use ethnum::I256;
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Hash32, JHeight, LockId, Timestamp, TokenId};

/// Payment preimage. Revealing it to a counterparty settles every lock
/// sharing `hashlock = keccak(secret)`.
pub type Secret = Hash32;

// ── Onion envelope ───────────────────────────────────────────────────────────

/// What one hop sees after peeling its layer: either the terminal
/// instruction (reveal the secret) or the forwarding instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnionPayload {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub final_recipient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_envelope: Option<Box<OnionEnvelope>>,
}

/// One layer of the routing onion. `Sealed` is Kyber768 + ChaCha20-Poly1305
/// against the hop's advertised encryption key; `Cleartext` exists for local
/// setups, is logged on decrypt, and is refused when the runtime requires
/// sealed onions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnionEnvelope {
    Sealed {
        #[serde(with = "xln_codec::bytes_hex")]
        kem_ct: Vec<u8>,
        #[serde(with = "xln_codec::bytes_hex")]
        nonce: Vec<u8>,
        #[serde(with = "xln_codec::bytes_hex")]
        ciphertext: Vec<u8>,
    },
    Cleartext {
        payload: OnionPayload,
    },
}

// ── HtlcLock ─────────────────────────────────────────────────────────────────

/// A hashlocked, timelocked hold on account capacity.
///
/// Exists from proposal commit until settle (secret reveal) or cancel
/// (timeout). `reveal_before_height` and `timelock` decrease monotonically
/// along a route so every upstream hop can still claim after its
/// downstream settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcLock {
    pub lock_id: LockId,
    pub token_id: TokenId,

    /// Locked amount, ≥ 1.
    #[serde(with = "xln_codec::sigint")]
    pub amount: I256,

    /// keccak-256 of the payment secret.
    pub hashlock: Hash32,

    /// Jurisdiction height after which this lock is expired and swept.
    pub reveal_before_height: JHeight,

    /// Absolute deadline (entity-local ms) for off-chain settlement.
    pub timelock: Timestamp,

    pub sender_is_left: bool,

    /// The onion layer addressed to the receiving counterparty.
    pub inner_envelope: OnionEnvelope,

    pub created_at: Timestamp,
}

impl HtlcLock {
    pub fn is_expired(&self, j_height: JHeight) -> bool {
        self.reveal_before_height <= j_height
    }
}

/// Lock identifier: keccak over the creating tuple, so both sides derive
/// the same id without coordination.
pub fn derive_lock_id(
    hashlock: &Hash32,
    token_id: TokenId,
    amount: &I256,
    created_at: Timestamp,
) -> LockId {
    let value = serde_json::json!({
        "hashlock": hashlock.to_hex(),
        "tokenId": token_id,
        "amount": amount.to_string(),
        "createdAt": created_at,
    });
    Hash32::from_bytes(xln_codec::keccak_value(&value))
}
