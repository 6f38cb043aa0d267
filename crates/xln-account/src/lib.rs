//! Bilateral account core: a two-party deterministic state machine over
//! per-token deltas with a right-wins tie-break, HTLC lifecycle, onion hop
//! processing, swap offers, and a settlement workspace compiling typed ops
//! into chain diffs.

pub mod apply;
pub mod capacity;
pub mod htlc;
pub mod machine;
pub mod proof;
pub mod settle;

pub use capacity::{derive, DerivedCapacity};
pub use htlc::{forward_amount, hop_reveal_height, hop_timelock, htlc_fee};
pub use machine::{
    AccountCtx, AccountEffect, AccountMachine, AccountStatus, DisputeState, GlobalCreditLimit,
    PendingFrame,
};
pub use proof::{build_proof_body, header_sign_bytes, proof_body_hash, ProofBody, Transformer};
pub use settle::{auto_approves, compile_ops};
