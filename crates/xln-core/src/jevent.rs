use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::htlc::Secret;
use crate::settle::SettlementDiff;
use crate::types::{EntityId, Hash32, TokenId};

/// The canonical jurisdiction event set. Variant and field names are stable
/// identifiers used in consensus; the watcher asserts parity against the
/// registered schema at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum JEvent {
    ReserveUpdated {
        entity: EntityId,
        token_id: TokenId,
        #[serde(with = "xln_codec::bigint")]
        new_balance: U256,
    },
    SecretRevealed {
        secret: Secret,
        hashlock: Hash32,
    },
    AccountSettled {
        left: EntityId,
        right: EntityId,
        diffs: Vec<SettlementDiff>,
    },
    DisputeStarted {
        sender: EntityId,
        counter: EntityId,
        nonce: u64,
    },
    DisputeFinalized {
        sender: EntityId,
        counter: EntityId,
        nonce: u64,
    },
    DebtCreated {
        debtor: EntityId,
        creditor: EntityId,
        token_id: TokenId,
        #[serde(with = "xln_codec::bigint")]
        amount: U256,
    },
}

/// Stable event-name table, in registration order.
pub const JEVENT_NAMES: [&str; 6] = [
    "ReserveUpdated",
    "SecretRevealed",
    "AccountSettled",
    "DisputeStarted",
    "DisputeFinalized",
    "DebtCreated",
];

impl JEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JEvent::ReserveUpdated { .. } => "ReserveUpdated",
            JEvent::SecretRevealed { .. } => "SecretRevealed",
            JEvent::AccountSettled { .. } => "AccountSettled",
            JEvent::DisputeStarted { .. } => "DisputeStarted",
            JEvent::DisputeFinalized { .. } => "DisputeFinalized",
            JEvent::DebtCreated { .. } => "DebtCreated",
        }
    }

    /// Relevance filter: does `me` need to see this event?
    /// `SecretRevealed` is broadcast; any entity may be watching the
    /// hashlock.
    pub fn concerns(&self, me: &EntityId) -> bool {
        match self {
            JEvent::ReserveUpdated { entity, .. } => entity == me,
            JEvent::SecretRevealed { .. } => true,
            JEvent::AccountSettled { left, right, .. } => left == me || right == me,
            JEvent::DisputeStarted { sender, counter, .. }
            | JEvent::DisputeFinalized { sender, counter, .. } => sender == me || counter == me,
            JEvent::DebtCreated { debtor, creditor, .. } => debtor == me || creditor == me,
        }
    }
}

/// All relevant events of one jurisdiction block, delivered to an entity as
/// a single `j_event` transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JBlock {
    pub block_number: u64,
    pub block_hash: Hash32,
    pub events: Vec<JEvent>,
}
