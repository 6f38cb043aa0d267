use std::collections::BTreeMap;

use ethnum::U256;
use serde::{Deserialize, Serialize};

use xln_core::constants::MESSAGE_RING_CAPACITY;
use xln_core::{
    ConsensusConfig, EntityId, Hash32, JBatchState, JHeight, LockId, Profile, ProposalAction,
    ProposalId, Secret, SignerId, Timestamp, TokenId, VoteChoice,
};
use xln_account::AccountMachine;

/// A governance proposal collecting weighted signer votes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer: SignerId,
    pub action: ProposalAction,
    pub votes: BTreeMap<SignerId, VoteChoice>,
    pub created_at: Timestamp,
}

impl Proposal {
    /// Weighted yes-shares under `config`.
    pub fn yes_shares(&self, config: &ConsensusConfig) -> u64 {
        self.votes
            .iter()
            .filter(|(_, choice)| **choice == VoteChoice::Yes)
            .map(|(signer, _)| config.shares.get(signer).copied().unwrap_or(0))
            .sum()
    }
}

/// Where a routed HTLC came from and where it went, keyed by hashlock;
/// drives upstream settle propagation and origin resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcRoute {
    pub inbound: Option<(EntityId, LockId)>,
    pub outbound: Option<(EntityId, LockId)>,
    /// Set once the preimage is known locally (idempotency guard).
    pub resolved_secret: Option<Secret>,
}

/// A debt observed on-chain via `DebtCreated`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtRecord {
    pub counterparty: EntityId,
    pub token_id: TokenId,
    #[serde(with = "xln_codec::bigint")]
    pub amount: U256,
    pub we_are_debtor: bool,
}

/// The replicated per-entity state machine. Everything in here is
/// consensus-visible: the frame `state_hash` is keccak over the canonical
/// tagged encoding of this struct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub config: ConsensusConfig,
    pub height: u64,
    pub timestamp: Timestamp,
    pub last_frame_hash: Hash32,

    /// Per-signer tx counters (replay bookkeeping in chat-style txs).
    pub nonces: BTreeMap<SignerId, u64>,

    /// Chat / event log, ring-buffered at `MESSAGE_RING_CAPACITY`.
    pub messages: Vec<String>,

    pub proposals: BTreeMap<ProposalId, Proposal>,

    #[serde(with = "xln_codec::bigint_map")]
    pub reserves: BTreeMap<TokenId, U256>,

    pub accounts: BTreeMap<EntityId, AccountMachine>,

    pub j_batch: JBatchState,
    pub last_finalized_j_height: JHeight,
    /// Block hash per observed jurisdiction block (replay detection).
    pub j_block_observations: BTreeMap<u64, Hash32>,

    pub htlc_routes: BTreeMap<Hash32, HtlcRoute>,
    pub debts: Vec<DebtRecord>,

    /// This entity's gossip self-description, if published.
    pub profile: Option<Profile>,
}

impl EntityState {
    pub fn new(entity_id: EntityId, config: ConsensusConfig) -> Self {
        Self {
            entity_id,
            config,
            height: 0,
            timestamp: 0,
            last_frame_hash: Hash32::ZERO,
            nonces: BTreeMap::new(),
            messages: Vec::new(),
            proposals: BTreeMap::new(),
            reserves: BTreeMap::new(),
            accounts: BTreeMap::new(),
            j_batch: JBatchState::default(),
            last_finalized_j_height: 0,
            j_block_observations: BTreeMap::new(),
            htlc_routes: BTreeMap::new(),
            debts: Vec::new(),
            profile: None,
        }
    }

    /// keccak over the canonical tagged encoding of the whole state.
    pub fn hash(&self) -> Hash32 {
        let value = xln_codec::encode_tagged(self).expect("state encoding is infallible");
        Hash32::from_bytes(xln_codec::keccak_value(&value))
    }

    /// Append to the ring-buffered message log.
    pub fn log_message(&mut self, message: String) {
        self.messages.push(message);
        if self.messages.len() > MESSAGE_RING_CAPACITY {
            let overflow = self.messages.len() - MESSAGE_RING_CAPACITY;
            self.messages.drain(..overflow);
        }
    }

    pub fn reserve(&self, token_id: TokenId) -> U256 {
        self.reserves.get(&token_id).copied().unwrap_or(U256::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ring_is_bounded() {
        let mut state =
            EntityState::new(EntityId::from_number(1), ConsensusConfig::single("s1"));
        for i in 0..250 {
            state.log_message(format!("m{i}"));
        }
        assert_eq!(state.messages.len(), MESSAGE_RING_CAPACITY);
        assert_eq!(state.messages.first().unwrap(), "m150");
        assert_eq!(state.messages.last().unwrap(), "m249");
    }

    #[test]
    fn state_hash_changes_with_content() {
        let mut state =
            EntityState::new(EntityId::from_number(1), ConsensusConfig::single("s1"));
        let h0 = state.hash();
        state.reserves.insert(1, U256::from(10u8));
        assert_ne!(h0, state.hash());
    }
}
