use ethnum::I256;

use xln_core::Delta;

/// Spendable / receivable capacity derived from one [`Delta`], from one
/// side's perspective.
///
/// Sign convention: `d = ondelta + offdelta` is the **left** side's claim.
/// Left receiving value raises `d`; left paying lowers it. The collateral
/// portion backing `d⁺` is left's share; claim beyond collateral is
/// uncollateralized credit, capped by the borrower's credit limit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivedCapacity {
    pub in_collateral: I256,
    pub out_collateral: I256,
    pub in_own_credit: I256,
    pub out_own_credit: I256,
    pub in_peer_credit: I256,
    pub out_peer_credit: I256,
    /// Usable outbound capacity after allowances and holds, clamped at 0.
    pub out_capacity: I256,
    /// Usable inbound capacity after allowances and holds, clamped at 0.
    pub in_capacity: I256,
}

fn clamp(v: I256, lo: I256, hi: I256) -> I256 {
    v.max(lo).min(hi)
}

fn pos(v: I256) -> I256 {
    v.max(I256::ZERO)
}

/// Derive usable capacities for the left or right seat.
///
/// One flow, two names: whatever is inbound for left is outbound for right,
/// so the right side reuses the left quantities with in/out and own/peer
/// swapped, and its own allowance and holds subtracted.
pub fn derive(delta: &Delta, is_left: bool) -> DerivedCapacity {
    let collateral = pos(delta.collateral);
    let d = delta.total();
    let d_pos = pos(d);

    // Left-perspective raw quantities.
    let in_collateral = clamp(collateral - d_pos, I256::ZERO, collateral);
    let out_collateral = d_pos.min(collateral);
    let in_own_credit = clamp(-d, I256::ZERO, delta.left_credit_limit);
    let out_own_credit = delta.left_credit_limit - in_own_credit;
    let out_peer_credit = clamp(d - collateral, I256::ZERO, delta.right_credit_limit);
    let in_peer_credit = delta.right_credit_limit - out_peer_credit;

    let left_holds = delta.left_htlc_hold + delta.left_swap_hold + delta.left_settle_hold;
    let right_holds = delta.right_htlc_hold + delta.right_swap_hold + delta.right_settle_hold;

    if is_left {
        DerivedCapacity {
            in_collateral,
            out_collateral,
            in_own_credit,
            out_own_credit,
            in_peer_credit,
            out_peer_credit,
            out_capacity: pos(
                out_peer_credit + out_collateral + out_own_credit
                    - delta.left_allowance
                    - left_holds,
            ),
            in_capacity: pos(
                in_own_credit + in_collateral + in_peer_credit
                    - delta.right_allowance
                    - right_holds,
            ),
        }
    } else {
        DerivedCapacity {
            in_collateral: out_collateral,
            out_collateral: in_collateral,
            in_own_credit: out_peer_credit,
            out_own_credit: in_peer_credit,
            in_peer_credit: out_own_credit,
            out_peer_credit: in_own_credit,
            out_capacity: pos(
                in_own_credit + in_collateral + in_peer_credit
                    - delta.right_allowance
                    - right_holds,
            ),
            in_capacity: pos(
                out_peer_credit + out_collateral + out_own_credit
                    - delta.left_allowance
                    - left_holds,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_with(collateral: i64, ondelta: i64, offdelta: i64, left_cl: i64, right_cl: i64) -> Delta {
        let mut d = Delta::new(1);
        d.collateral = I256::from(collateral);
        d.ondelta = I256::from(ondelta);
        d.offdelta = I256::from(offdelta);
        d.left_credit_limit = I256::from(left_cl);
        d.right_credit_limit = I256::from(right_cl);
        d
    }

    #[test]
    fn fresh_account_capacity_is_own_credit() {
        let d = delta_with(0, 0, 0, 1_000_000, 1_000_000);
        let left = derive(&d, true);
        assert_eq!(left.out_capacity, I256::from(1_000_000));
        assert_eq!(left.in_capacity, I256::from(1_000_000));
    }

    #[test]
    fn payment_on_credit_shifts_capacity() {
        // Left paid 50_000 on credit: d = -50_000.
        let d = delta_with(0, 0, -50_000, 1_000_000, 1_000_000);
        let left = derive(&d, true);
        assert_eq!(left.in_own_credit, I256::from(50_000));
        assert_eq!(left.out_own_credit, I256::from(950_000));
        assert_eq!(left.out_capacity, I256::from(950_000));
        assert_eq!(left.in_capacity, I256::from(1_050_000));

        // Mirror: right gained 50_000 of spendable claim.
        let right = derive(&d, false);
        assert_eq!(right.out_peer_credit, I256::from(50_000));
        assert_eq!(right.out_capacity, I256::from(1_050_000));
        assert_eq!(right.in_capacity, I256::from(950_000));
    }

    #[test]
    fn mirrored_capacities_agree() {
        let d = delta_with(500, 120, -20, 300, 700);
        let left = derive(&d, true);
        let right = derive(&d, false);
        assert_eq!(left.out_capacity, right.in_capacity);
        assert_eq!(left.in_capacity, right.out_capacity);
    }

    #[test]
    fn collateral_splits_by_claim() {
        // Collateral 100, left claim 30.
        let d = delta_with(100, 30, 0, 0, 0);
        let left = derive(&d, true);
        assert_eq!(left.out_collateral, I256::from(30));
        assert_eq!(left.in_collateral, I256::from(70));
        let right = derive(&d, false);
        // Right's spendable share is the remaining 70.
        assert_eq!(right.out_collateral, I256::from(70));
        assert_eq!(right.out_capacity, I256::from(70));
        assert_eq!(right.in_collateral, I256::from(30));
    }

    #[test]
    fn holds_reduce_out_capacity() {
        let mut d = delta_with(0, 0, 0, 100, 0);
        d.left_htlc_hold = I256::from(40);
        let left = derive(&d, true);
        assert_eq!(left.out_capacity, I256::from(60));
        // Peer's inbound shrinks by the same hold.
        let right = derive(&d, false);
        assert_eq!(right.in_capacity, I256::from(60));
    }

    #[test]
    fn capacity_never_negative() {
        let mut d = delta_with(0, 0, 0, 10, 0);
        d.left_htlc_hold = I256::from(50);
        assert_eq!(derive(&d, true).out_capacity, I256::ZERO);
    }
}
