use ethnum::I256;
use serde::{Deserialize, Serialize};

use crate::types::{Hash32, Timestamp, TokenId};

// ── Settlement ops ───────────────────────────────────────────────────────────

/// A typed settlement instruction, expressed from the **proposer's**
/// viewpoint. Compiled into per-token [`SettlementDiff`]s.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SettlementOp {
    /// Move proposer reserve into account collateral.
    R2c {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },
    /// Move the proposer's collateral share back to its reserve.
    C2r {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },
    /// Direct reserve-to-reserve transfer to the counterparty.
    R2r {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },
    /// Forgive counterparty debt (reduces the proposer's claim).
    Forgive {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },
    /// Escape hatch: an explicit diff, still conservation-checked.
    RawDiff {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        left_diff: I256,
        #[serde(with = "xln_codec::sigint")]
        right_diff: I256,
        #[serde(with = "xln_codec::sigint")]
        collateral_diff: I256,
        #[serde(with = "xln_codec::sigint")]
        ondelta_diff: I256,
    },
}

impl SettlementOp {
    pub fn token_id(&self) -> TokenId {
        match self {
            SettlementOp::R2c { token_id, .. }
            | SettlementOp::C2r { token_id, .. }
            | SettlementOp::R2r { token_id, .. }
            | SettlementOp::Forgive { token_id, .. }
            | SettlementOp::RawDiff { token_id, .. } => *token_id,
        }
    }
}

/// Per-token chain diff. Invariant on every applied diff:
/// `left_diff + right_diff + collateral_diff == 0`. `ondelta_diff` tracks
/// how much of the collateral change is the **left** side's share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDiff {
    pub token_id: TokenId,
    #[serde(with = "xln_codec::sigint")]
    pub left_diff: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_diff: I256,
    #[serde(with = "xln_codec::sigint")]
    pub collateral_diff: I256,
    #[serde(with = "xln_codec::sigint")]
    pub ondelta_diff: I256,
}

impl SettlementDiff {
    pub fn conserves(&self) -> bool {
        self.left_diff + self.right_diff + self.collateral_diff == I256::ZERO
    }
}

/// Workspace status while a settlement is being negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Drafting,
    Proposed,
    Accepted,
    Rejected,
}

/// Accumulates typed ops from the proposer's viewpoint until proposed,
/// then compiled and answered by the counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementWorkspace {
    pub proposer_is_left: bool,
    pub ops: Vec<SettlementOp>,
    pub status: SettlementStatus,
    pub created_at: Timestamp,
}

// ── Proof header ─────────────────────────────────────────────────────────────

/// The signed tuple authorizing either a cooperative update or a dispute
/// proof: `(depository, ch_key, nonce, proof_body_hash)`.
///
/// `nonce` is the canonical field name; historical encoders split it into
/// `cooperative_nonce` / `dispute_nonce`, which the decoder still accepts
/// (preferring `cooperative_nonce` when both appear) and re-encodes as
/// `nonce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProofHeader {
    pub depository: String,
    #[serde(with = "xln_codec::bytes_hex")]
    pub ch_key: Vec<u8>,
    pub nonce: u64,
    pub proof_body_hash: Hash32,
}

impl<'de> Deserialize<'de> for ProofHeader {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            depository: String,
            #[serde(with = "xln_codec::bytes_hex")]
            ch_key: Vec<u8>,
            nonce: Option<u64>,
            cooperative_nonce: Option<u64>,
            dispute_nonce: Option<u64>,
            proof_body_hash: Hash32,
        }
        let raw = Raw::deserialize(deserializer)?;
        let nonce = raw
            .cooperative_nonce
            .or(raw.nonce)
            .or(raw.dispute_nonce)
            .ok_or_else(|| serde::de::Error::missing_field("nonce"))?;
        Ok(ProofHeader {
            depository: raw.depository,
            ch_key: raw.ch_key,
            nonce,
            proof_body_hash: raw.proof_body_hash,
        })
    }
}

// ── Withdrawals & rebalance ──────────────────────────────────────────────────

/// A collateral withdrawal awaiting counterparty co-sign; expires after
/// `WITHDRAWAL_TIMEOUT_MS`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub token_id: TokenId,
    #[serde(with = "xln_codec::sigint")]
    pub amount: I256,
    pub requested_at: Timestamp,
    pub requester_is_left: bool,
}

/// Per-account hub rebalancing knobs consulted by the crontab sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePolicy {
    pub enabled: bool,
    /// Collateral floor per token; dropping below flags a rebalance need.
    #[serde(with = "xln_codec::bigint_map")]
    pub target_collateral: std::collections::BTreeMap<TokenId, ethnum::U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_header_accepts_legacy_nonce_fields() {
        let legacy = serde_json::json!({
            "depository": "0xdep",
            "ch_key": {"__xlnType": "bytes", "value": "0x0102"},
            "cooperative_nonce": 7,
            "dispute_nonce": 3,
            "proof_body_hash": "0x".to_string() + &"00".repeat(32),
        });
        let header: ProofHeader = serde_json::from_value(legacy).unwrap();
        assert_eq!(header.nonce, 7);

        // Canonical re-encode carries only `nonce`.
        let v = serde_json::to_value(&header).unwrap();
        assert_eq!(v["nonce"], 7);
        assert!(v.get("cooperative_nonce").is_none());
    }

    #[test]
    fn diff_conservation() {
        let ok = SettlementDiff {
            token_id: 1,
            left_diff: I256::from(-5),
            right_diff: I256::ZERO,
            collateral_diff: I256::from(5),
            ondelta_diff: I256::from(5),
        };
        assert!(ok.conserves());
    }
}
