use ethnum::I256;
use serde::{Deserialize, Serialize};

use crate::types::TokenId;

/// Per-token bilateral position. All quantities are signed 256-bit; the
/// sign convention is from the **left** entity's perspective: a positive
/// `ondelta + offdelta` means value has moved toward left.
///
/// `collateral`, the credit limits, the allowances and the holds are
/// non-negative by invariant (validated, not typed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub token_id: TokenId,

    /// On-chain collateral locked to this account for this token.
    #[serde(with = "xln_codec::sigint")]
    pub collateral: I256,

    /// Portion of the position anchored on-chain (moves only via settlement
    /// or dispute).
    #[serde(with = "xln_codec::sigint")]
    pub ondelta: I256,

    /// Off-chain portion, re-priced by every account frame.
    #[serde(with = "xln_codec::sigint")]
    pub offdelta: I256,

    #[serde(with = "xln_codec::sigint")]
    pub left_credit_limit: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_credit_limit: I256,

    #[serde(with = "xln_codec::sigint")]
    pub left_allowance: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_allowance: I256,

    /// Capacity reserved by pending HTLCs.
    #[serde(with = "xln_codec::sigint")]
    pub left_htlc_hold: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_htlc_hold: I256,

    /// Capacity reserved by open swap offers.
    #[serde(with = "xln_codec::sigint")]
    pub left_swap_hold: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_swap_hold: I256,

    /// Capacity reserved by an in-flight settlement workspace.
    #[serde(with = "xln_codec::sigint")]
    pub left_settle_hold: I256,
    #[serde(with = "xln_codec::sigint")]
    pub right_settle_hold: I256,
}

impl Delta {
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            collateral: I256::ZERO,
            ondelta: I256::ZERO,
            offdelta: I256::ZERO,
            left_credit_limit: I256::ZERO,
            right_credit_limit: I256::ZERO,
            left_allowance: I256::ZERO,
            right_allowance: I256::ZERO,
            left_htlc_hold: I256::ZERO,
            right_htlc_hold: I256::ZERO,
            left_swap_hold: I256::ZERO,
            right_swap_hold: I256::ZERO,
            left_settle_hold: I256::ZERO,
            right_settle_hold: I256::ZERO,
        }
    }

    /// Total position `d = ondelta + offdelta`.
    pub fn total(&self) -> I256 {
        self.ondelta + self.offdelta
    }

    /// Non-negativity invariants on the unsigned-by-convention fields.
    pub fn validate(&self) -> Result<(), crate::error::XlnError> {
        let named = [
            ("collateral", self.collateral),
            ("left_credit_limit", self.left_credit_limit),
            ("right_credit_limit", self.right_credit_limit),
            ("left_allowance", self.left_allowance),
            ("right_allowance", self.right_allowance),
            ("left_htlc_hold", self.left_htlc_hold),
            ("right_htlc_hold", self.right_htlc_hold),
            ("left_swap_hold", self.left_swap_hold),
            ("right_swap_hold", self.right_swap_hold),
            ("left_settle_hold", self.left_settle_hold),
            ("right_settle_hold", self.right_settle_hold),
        ];
        for (name, value) in named {
            if value < I256::ZERO {
                return Err(crate::error::XlnError::DeltaValidationFailed {
                    token_id: self.token_id,
                    detail: format!("{name} is negative: {value}"),
                });
            }
        }
        Ok(())
    }
}
