use ethnum::I256;
use serde::{Deserialize, Serialize};

use crate::types::{OfferId, Timestamp, TokenId};

/// An open intra-account token swap offer.
///
/// The owner gives `give_amount` of `give_token` for `take_amount` of
/// `take_token` (or any partial fill at that ratio or better). The unfilled
/// give side is held via the owner's swap hold on `give_token`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOffer {
    pub offer_id: OfferId,
    pub owner_is_left: bool,

    pub give_token: TokenId,
    #[serde(with = "xln_codec::sigint")]
    pub give_amount: I256,

    pub take_token: TokenId,
    #[serde(with = "xln_codec::sigint")]
    pub take_amount: I256,

    /// Cumulative filled portion of `give_amount`.
    #[serde(with = "xln_codec::sigint")]
    pub filled_give: I256,

    pub created_at: Timestamp,
}

impl SwapOffer {
    /// Unfilled remainder of the give side.
    pub fn remaining_give(&self) -> I256 {
        self.give_amount - self.filled_give
    }

    /// True when a fill of `fill_give` against `fill_take` respects the
    /// offered price: `fill_take / fill_give ≥ take_amount / give_amount`,
    /// evaluated in integers as cross-multiplication.
    pub fn fill_is_fair(&self, fill_give: I256, fill_take: I256) -> bool {
        if fill_give <= I256::ZERO || fill_take < I256::ZERO {
            return false;
        }
        fill_take * self.give_amount >= self.take_amount * fill_give
    }
}
