use std::collections::BTreeMap;

use ethnum::I256;

use xln_core::{SettlementDiff, SettlementOp, TokenId, XlnError};

/// Compile a settlement op list into per-token chain diffs.
///
/// Ops are expressed from the proposer's viewpoint; the compiler rotates
/// them into the canonical left/right frame and enforces conservation
/// (`left + right + collateral == 0`) on every token.
pub fn compile_ops(
    ops: &[SettlementOp],
    proposer_is_left: bool,
) -> Result<Vec<SettlementDiff>, XlnError> {
    let mut by_token: BTreeMap<TokenId, SettlementDiff> = BTreeMap::new();

    for op in ops {
        let entry = by_token.entry(op.token_id()).or_insert_with(|| SettlementDiff {
            token_id: op.token_id(),
            left_diff: I256::ZERO,
            right_diff: I256::ZERO,
            collateral_diff: I256::ZERO,
            ondelta_diff: I256::ZERO,
        });

        match op {
            SettlementOp::R2c { amount, .. } => {
                // Proposer reserve funds new collateral owned by the proposer.
                if proposer_is_left {
                    entry.left_diff -= *amount;
                    entry.ondelta_diff += *amount;
                } else {
                    entry.right_diff -= *amount;
                }
                entry.collateral_diff += *amount;
            }
            SettlementOp::C2r { amount, .. } => {
                // Proposer takes its collateral share back to reserve.
                if proposer_is_left {
                    entry.left_diff += *amount;
                    entry.ondelta_diff -= *amount;
                } else {
                    entry.right_diff += *amount;
                }
                entry.collateral_diff -= *amount;
            }
            SettlementOp::R2r { amount, .. } => {
                if proposer_is_left {
                    entry.left_diff -= *amount;
                    entry.right_diff += *amount;
                } else {
                    entry.right_diff -= *amount;
                    entry.left_diff += *amount;
                }
            }
            SettlementOp::Forgive { amount, .. } => {
                // Shrink the proposer's on-chain claim; no value moves.
                if proposer_is_left {
                    entry.ondelta_diff -= *amount;
                } else {
                    entry.ondelta_diff += *amount;
                }
            }
            SettlementOp::RawDiff {
                left_diff,
                right_diff,
                collateral_diff,
                ondelta_diff,
                ..
            } => {
                entry.left_diff += *left_diff;
                entry.right_diff += *right_diff;
                entry.collateral_diff += *collateral_diff;
                entry.ondelta_diff += *ondelta_diff;
            }
        }
    }

    let diffs: Vec<SettlementDiff> = by_token.into_values().collect();
    for diff in &diffs {
        if !diff.conserves() {
            return Err(XlnError::SettlementInvariantViolation {
                token_id: diff.token_id,
                sum: (diff.left_diff + diff.right_diff + diff.collateral_diff).to_string(),
            });
        }
    }
    Ok(diffs)
}

/// The counterparty auto-approval rule: approve iff, on every token,
/// (a) the approver's reserve does not decrease, and (b) any collateral
/// decrease is charged to the proposer's share: for a left approver
/// `ondelta_diff ≥ 0`, for a right approver `collateral_diff − ondelta_diff
/// ≥ 0`.
pub fn auto_approves(diffs: &[SettlementDiff], approver_is_left: bool) -> bool {
    diffs.iter().all(|diff| {
        let reserve_ok = if approver_is_left {
            diff.left_diff >= I256::ZERO
        } else {
            diff.right_diff >= I256::ZERO
        };
        let share_ok = if approver_is_left {
            diff.ondelta_diff >= I256::ZERO
        } else {
            diff.collateral_diff - diff.ondelta_diff >= I256::ZERO
        };
        reserve_ok && share_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2c_conserves_and_credits_proposer_share() {
        let ops = vec![SettlementOp::R2c { token_id: 1, amount: I256::from(100) }];
        let diffs = compile_ops(&ops, true).unwrap();
        assert_eq!(diffs.len(), 1);
        let d = &diffs[0];
        assert_eq!(d.left_diff, I256::from(-100));
        assert_eq!(d.collateral_diff, I256::from(100));
        assert_eq!(d.ondelta_diff, I256::from(100));
        assert!(d.conserves());
        // Right auto-approves: its reserve and share are untouched.
        assert!(auto_approves(&diffs, false));
    }

    #[test]
    fn c2r_by_right_leaves_left_share() {
        let ops = vec![SettlementOp::C2r { token_id: 1, amount: I256::from(40) }];
        let diffs = compile_ops(&ops, false).unwrap();
        let d = &diffs[0];
        assert_eq!(d.right_diff, I256::from(40));
        assert_eq!(d.collateral_diff, I256::from(-40));
        assert_eq!(d.ondelta_diff, I256::ZERO);
        // Left approves: collateral fell but entirely out of right's share.
        assert!(auto_approves(&diffs, true));
    }

    #[test]
    fn taking_from_approver_reserve_blocks_auto_approve() {
        let ops = vec![SettlementOp::RawDiff {
            token_id: 1,
            left_diff: I256::from(10),
            right_diff: I256::from(-10),
            collateral_diff: I256::ZERO,
            ondelta_diff: I256::ZERO,
        }];
        let diffs = compile_ops(&ops, true).unwrap();
        assert!(!auto_approves(&diffs, false));
        assert!(auto_approves(&diffs, true));
    }

    #[test]
    fn broken_raw_diff_fails_conservation() {
        let ops = vec![SettlementOp::RawDiff {
            token_id: 1,
            left_diff: I256::from(5),
            right_diff: I256::ZERO,
            collateral_diff: I256::ZERO,
            ondelta_diff: I256::ZERO,
        }];
        assert!(matches!(
            compile_ops(&ops, true),
            Err(XlnError::SettlementInvariantViolation { .. })
        ));
    }

    #[test]
    fn ops_merge_per_token() {
        let ops = vec![
            SettlementOp::R2c { token_id: 1, amount: I256::from(100) },
            SettlementOp::R2r { token_id: 1, amount: I256::from(30) },
            SettlementOp::R2r { token_id: 2, amount: I256::from(7) },
        ];
        let diffs = compile_ops(&ops, true).unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].left_diff, I256::from(-130));
        assert_eq!(diffs[0].right_diff, I256::from(30));
        assert_eq!(diffs[1].right_diff, I256::from(7));
    }
}
