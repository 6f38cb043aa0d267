use serde::{Deserialize, Serialize};

use crate::delta::Delta;
use crate::tx::{AccountTx, EntityTx};
use crate::types::{Hash32, JHeight, Timestamp, TokenId};

/// An ordered, hash-chained batch of entity transactions, the atomic unit
/// of entity consensus. The frame hash is keccak over the canonical tagged
/// encoding of the whole frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFrame {
    pub height: u64,
    pub timestamp: Timestamp,
    pub txs: Vec<EntityTx>,
    pub prev_hash: Hash32,
    /// Hash of the post-state produced by applying `txs`.
    pub state_hash: Hash32,
    /// Additional hashes validators co-sign in this round (account proof
    /// bodies produced while applying the frame).
    pub hashes_to_sign: Vec<Hash32>,
}

impl EntityFrame {
    pub fn hash(&self) -> Hash32 {
        let value = xln_codec::encode_tagged(self).expect("frame encoding is infallible");
        Hash32::from_bytes(xln_codec::keccak_value(&value))
    }
}

/// One bilateral account frame: the txs plus the full post-state deltas,
/// so either side can verify the other's application byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFrame {
    pub height: u64,
    pub timestamp: Timestamp,
    /// Jurisdiction height observed by the proposer; prices HTLC expiry.
    pub j_height: JHeight,
    pub account_txs: Vec<AccountTx>,
    pub prev_frame_hash: Hash32,
    pub state_hash: Hash32,
    /// Tokens touched, in ascending order.
    pub token_ids: Vec<TokenId>,
    /// Post-state of every touched token, canonical left perspective.
    pub deltas: Vec<Delta>,
}

impl AccountFrame {
    pub fn hash(&self) -> Hash32 {
        let value = xln_codec::encode_tagged(self).expect("frame encoding is infallible");
        Hash32::from_bytes(xln_codec::keccak_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_hash_is_stable_and_content_sensitive() {
        let frame = EntityFrame {
            height: 1,
            timestamp: 1000,
            txs: vec![],
            prev_hash: Hash32::ZERO,
            state_hash: Hash32::ZERO,
            hashes_to_sign: vec![],
        };
        let h1 = frame.hash();
        assert_eq!(h1, frame.clone().hash());

        let mut other = frame;
        other.height = 2;
        assert_ne!(h1, other.hash());
    }
}
