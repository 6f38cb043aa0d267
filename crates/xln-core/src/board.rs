use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_VALIDATORS;
use crate::error::XlnError;
use crate::types::{EntityId, SignerId};

// ── Quorum board ─────────────────────────────────────────────────────────────

/// One validator seat on an entity board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSeat {
    pub signer_id: SignerId,
    pub shares: u64,
}

/// The quorum composition an entity is governed by. The canonical encoding
/// (seats sorted by signer id) is what lazy entity IDs are derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub threshold: u64,
    pub seats: Vec<BoardSeat>,
}

impl Board {
    /// Canonical form: seats sorted by signer id.
    pub fn canonicalize(mut self) -> Self {
        self.seats.sort_by(|a, b| a.signer_id.cmp(&b.signer_id));
        self
    }

    pub fn total_shares(&self) -> u64 {
        self.seats.iter().map(|s| s.shares).sum()
    }
}

/// Lazy entity ID: keccak over the canonical tagged encoding of the board.
/// Entities with identical quorum composition collapse to the same ID.
pub fn lazy_entity_id(board: &Board) -> EntityId {
    let canonical = board.clone().canonicalize();
    let value = xln_codec::encode_tagged(&canonical).expect("board encoding is infallible");
    EntityId::from_bytes(xln_codec::keccak_value(&value))
}

/// Named entity ID: keccak of the registered UTF-8 name. Resolution of the
/// name itself happens off-chain.
pub fn named_entity_id(name: &str) -> EntityId {
    EntityId::from_bytes(xln_codec::keccak_bytes(name.as_bytes()))
}

// ── ConsensusConfig ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusMode {
    ProposerBased,
}

/// Per-entity consensus parameters.
///
/// Invariants (checked by [`ConsensusConfig::validate`]):
/// `1 ≤ threshold ≤ Σ shares`, `1 ≤ |validators| ≤ 100`, the shares map
/// keys exactly the validator list, no duplicate validators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub mode: ConsensusMode,
    pub threshold: u64,
    /// Proposer order: `validators[0]` proposes until demoted.
    pub validators: Vec<SignerId>,
    pub shares: BTreeMap<SignerId, u64>,
    /// Depository address on the anchoring jurisdiction, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
}

impl ConsensusConfig {
    /// Single-signer config used throughout tests and lazy entities.
    pub fn single(signer: impl Into<SignerId>) -> Self {
        let signer = signer.into();
        let mut shares = BTreeMap::new();
        shares.insert(signer.clone(), 1);
        Self {
            mode: ConsensusMode::ProposerBased,
            threshold: 1,
            validators: vec![signer],
            shares,
            jurisdiction: None,
        }
    }

    pub fn validate(&self) -> Result<(), XlnError> {
        if self.validators.is_empty() {
            return Err(XlnError::InvalidQuorum { detail: "no validators".into() });
        }
        if self.validators.len() > MAX_VALIDATORS {
            return Err(XlnError::InvalidQuorum {
                detail: format!("{} validators exceeds maximum {MAX_VALIDATORS}", self.validators.len()),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for v in &self.validators {
            if !seen.insert(v) {
                return Err(XlnError::InvalidQuorum { detail: format!("duplicate validator {v}") });
            }
            if !self.shares.contains_key(v) {
                return Err(XlnError::InvalidQuorum { detail: format!("no shares entry for {v}") });
            }
        }
        if self.shares.len() != self.validators.len() {
            return Err(XlnError::InvalidQuorum {
                detail: "shares map carries signers outside the validator list".into(),
            });
        }
        let total: u64 = self.shares.values().sum();
        if self.threshold == 0 || self.threshold > total {
            return Err(XlnError::InvalidQuorum {
                detail: format!("threshold {} outside 1..=Σshares ({total})", self.threshold),
            });
        }
        Ok(())
    }

    pub fn total_shares(&self) -> u64 {
        self.shares.values().sum()
    }

    /// The board this config corresponds to (for lazy ID derivation).
    pub fn board(&self) -> Board {
        Board {
            threshold: self.threshold,
            seats: self
                .validators
                .iter()
                .map(|v| BoardSeat { signer_id: v.clone(), shares: self.shares[v] })
                .collect(),
        }
        .canonicalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(threshold: u64, seats: &[(&str, u64)]) -> Board {
        Board {
            threshold,
            seats: seats
                .iter()
                .map(|(s, w)| BoardSeat { signer_id: s.to_string(), shares: *w })
                .collect(),
        }
    }

    #[test]
    fn lazy_id_ignores_seat_order() {
        let a = board(2, &[("alice", 1), ("bob", 2)]);
        let b = board(2, &[("bob", 2), ("alice", 1)]);
        assert_eq!(lazy_entity_id(&a), lazy_entity_id(&b));
    }

    #[test]
    fn lazy_id_depends_on_threshold() {
        let a = board(1, &[("alice", 1), ("bob", 2)]);
        let b = board(2, &[("alice", 1), ("bob", 2)]);
        assert_ne!(lazy_entity_id(&a), lazy_entity_id(&b));
    }

    #[test]
    fn config_validation() {
        let ok = ConsensusConfig::single("s1");
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.threshold = 2; // Σ shares == 1
        assert!(matches!(bad.validate(), Err(XlnError::InvalidQuorum { .. })));

        let mut dup = ok.clone();
        dup.validators.push("s1".into());
        assert!(dup.validate().is_err());

        let mut orphan_share = ok;
        orphan_share.shares.insert("ghost".into(), 5);
        assert!(orphan_share.validate().is_err());
    }
}
