use std::collections::BTreeMap;

use ethnum::I256;
use serde::{Deserialize, Serialize};

use xln_core::{
    channel_key, Delta, EntityId, Hash32, HtlcLock, ProofHeader, SwapOffer, TokenId,
};

/// A pending transformer carried in the proof body: the dispute path must
/// honor in-flight HTLCs and open swap offers on top of raw offdeltas.
/// Signed amounts are from the left perspective (negative = owed by left).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transformer {
    Htlc {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
        hashlock: Hash32,
        reveal_before_height: u64,
    },
    Swap {
        give_token: TokenId,
        #[serde(with = "xln_codec::sigint")]
        give_amount: I256,
        take_token: TokenId,
        #[serde(with = "xln_codec::sigint")]
        take_amount: I256,
    },
}

/// The bilateral consensus object: canonical encoding of the full off-chain
/// position. Both sides sign its keccak hash under the proof header tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBody {
    #[serde(with = "xln_codec::sigint_vec")]
    pub offdeltas: Vec<I256>,
    pub token_ids: Vec<TokenId>,
    pub transformers: Vec<Transformer>,
}

/// Build the proof body from the current position. Token order is the
/// ascending `token_ids` order; transformers are emitted locks first (by
/// lock id), then offers (by offer id), so both sides emit the same order.
pub fn build_proof_body(
    deltas: &BTreeMap<TokenId, Delta>,
    locks: &BTreeMap<Hash32, HtlcLock>,
    offers: &BTreeMap<Hash32, SwapOffer>,
) -> ProofBody {
    let mut offdeltas = Vec::with_capacity(deltas.len());
    let mut token_ids = Vec::with_capacity(deltas.len());
    for (token_id, delta) in deltas {
        token_ids.push(*token_id);
        offdeltas.push(delta.offdelta);
    }

    let mut transformers = Vec::with_capacity(locks.len() + offers.len());
    for lock in locks.values() {
        // Left-perspective sign: a lock sent by left will, on settle, lower
        // left's claim.
        let amount = if lock.sender_is_left { -lock.amount } else { lock.amount };
        transformers.push(Transformer::Htlc {
            token_id: lock.token_id,
            amount,
            hashlock: lock.hashlock,
            reveal_before_height: lock.reveal_before_height,
        });
    }
    for offer in offers.values() {
        let sign = if offer.owner_is_left { -I256::ONE } else { I256::ONE };
        transformers.push(Transformer::Swap {
            give_token: offer.give_token,
            give_amount: sign * offer.remaining_give(),
            take_token: offer.take_token,
            take_amount: -sign * offer.take_amount,
        });
    }

    ProofBody { offdeltas, token_ids, transformers }
}

/// keccak over the canonical tagged encoding of the body.
pub fn proof_body_hash(body: &ProofBody) -> Hash32 {
    let value = xln_codec::encode_tagged(body).expect("proof body encoding is infallible");
    Hash32::from_bytes(xln_codec::keccak_value(&value))
}

/// Assemble the header both sides sign for the current position.
pub fn build_proof_header(
    depository: &str,
    left: &EntityId,
    right: &EntityId,
    nonce: u64,
    body_hash: Hash32,
) -> ProofHeader {
    ProofHeader {
        depository: depository.to_string(),
        ch_key: channel_key(left, right),
        nonce,
        proof_body_hash: body_hash,
    }
}

/// The exact bytes a signer commits to for a proof header.
pub fn header_sign_bytes(header: &ProofHeader) -> Vec<u8> {
    let value = xln_codec::encode_tagged(header).expect("header encoding is infallible");
    xln_codec::canonical_string(&value).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_core::{OnionEnvelope, OnionPayload};

    #[test]
    fn body_hash_tracks_position() {
        let mut deltas = BTreeMap::new();
        deltas.insert(1u32, Delta::new(1));
        let body = build_proof_body(&deltas, &BTreeMap::new(), &BTreeMap::new());
        let h1 = proof_body_hash(&body);

        let mut moved = deltas.clone();
        moved.get_mut(&1).unwrap().offdelta = I256::from(5);
        let body2 = build_proof_body(&moved, &BTreeMap::new(), &BTreeMap::new());
        assert_ne!(h1, proof_body_hash(&body2));
    }

    #[test]
    fn locks_flip_sign_by_sender_side() {
        let mut deltas = BTreeMap::new();
        deltas.insert(1u32, Delta::new(1));
        let mut locks = BTreeMap::new();
        let lock = HtlcLock {
            lock_id: Hash32::from_bytes([1; 32]),
            token_id: 1,
            amount: I256::from(100),
            hashlock: Hash32::from_bytes([2; 32]),
            reveal_before_height: 10,
            timelock: 1000,
            sender_is_left: true,
            inner_envelope: OnionEnvelope::Cleartext {
                payload: OnionPayload {
                    final_recipient: true,
                    secret: None,
                    next_hop: None,
                    inner_envelope: None,
                },
            },
            created_at: 0,
        };
        locks.insert(lock.lock_id, lock);
        let body = build_proof_body(&deltas, &locks, &BTreeMap::new());
        match &body.transformers[0] {
            Transformer::Htlc { amount, .. } => assert_eq!(*amount, I256::from(-100)),
            other => panic!("unexpected transformer {other:?}"),
        }
    }
}
