use ethnum::I256;

use xln_core::constants::{BASE_FEE_USD, FEE_DENOMINATOR, FEE_RATE_UBP, MIN_TIMELOCK_DELTA_MS};
use xln_core::{JHeight, Timestamp, XlnError};

/// Amount a hop forwards after retaining its fee:
/// `floor(amount · (D − R) / D) − BASE`. Computing the retained side first
/// and flooring once keeps the ladder exact (`10_000_000 → 9_999_900 →
/// 9_999_800` at 1 bp).
pub fn forward_amount(amount: I256) -> Result<I256, XlnError> {
    let rate_kept = I256::from(FEE_DENOMINATOR - FEE_RATE_UBP);
    let forwarded = amount * rate_kept / I256::from(FEE_DENOMINATOR) - I256::from(BASE_FEE_USD);
    if forwarded <= I256::ZERO {
        return Err(XlnError::FeeExceedsAmount {
            fee: (amount - forwarded.max(I256::ZERO)).to_string(),
            amount: amount.to_string(),
        });
    }
    Ok(forwarded)
}

/// The fee a hop retains when forwarding `amount`.
pub fn htlc_fee(amount: I256) -> I256 {
    match forward_amount(amount) {
        Ok(forwarded) => amount - forwarded,
        Err(_) => amount,
    }
}

// ── Hop ladder ───────────────────────────────────────────────────────────────
//
// Hops are counted from the sender: k = 0 is the sender's outgoing lock.
// Each hop shrinks both deadlines by one step, so every upstream lock
// outlives its downstream lock.

/// Off-chain settlement deadline of hop `k`: one `MIN_TIMELOCK_DELTA_MS`
/// step shorter per hop.
pub fn hop_timelock(base: Timestamp, k: usize) -> Timestamp {
    base.saturating_sub(k as u64 * MIN_TIMELOCK_DELTA_MS)
}

/// On-chain reveal deadline of hop `k` on a route of `num_hops` entities:
/// `base + (H − k)`, decreasing by one block per hop.
pub fn hop_reveal_height(base: JHeight, num_hops: usize, k: usize) -> JHeight {
    base + (num_hops as u64).saturating_sub(k as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_ladder_matches_reference_values() {
        // 3-hop route at FEE_RATE_UBP = 100 (1 basis point).
        let a0 = I256::from(10_000_000u64);
        let a1 = forward_amount(a0).unwrap();
        assert_eq!(a1, I256::from(9_999_900u64));
        let a2 = forward_amount(a1).unwrap();
        // 9_999_900 · 0.99999 = 9_999_800.001 → floor.
        assert_eq!(a2, I256::from(9_999_800u64));
    }

    #[test]
    fn fee_is_nonnegative_and_below_amount() {
        for amount in [2u64, 100, 10_000, 10_000_000, u64::MAX / 2] {
            let a = I256::from(amount);
            let fee = htlc_fee(a);
            assert!(fee >= I256::ZERO);
            assert!(fee < a);
        }
    }

    #[test]
    fn dust_forward_fails() {
        // amount 1 forwards 0 after fees.
        assert!(matches!(
            forward_amount(I256::ONE),
            Err(XlnError::FeeExceedsAmount { .. })
        ));
    }

    #[test]
    fn deadlines_shrink_along_route() {
        let hops = 4;
        let base_t = 1_000_000;
        let base_h = 50;
        let mut prev_t = u64::MAX;
        let mut prev_h = u64::MAX;
        for k in 0..hops - 1 {
            let t = hop_timelock(base_t, k);
            let h = hop_reveal_height(base_h, hops, k);
            assert!(t < prev_t);
            assert!(h < prev_h);
            prev_t = t;
            prev_h = h;
        }
        assert_eq!(hop_timelock(base_t, 1), base_t - MIN_TIMELOCK_DELTA_MS);
        assert_eq!(hop_reveal_height(base_h, hops, 0), base_h + 4);
        assert_eq!(hop_reveal_height(base_h, hops, 1), base_h + 3);
    }
}
