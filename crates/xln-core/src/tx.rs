use std::collections::BTreeMap;

use ethnum::I256;
use serde::{Deserialize, Serialize};

use crate::frame::{AccountFrame, EntityFrame};
use crate::htlc::{HtlcLock, OnionEnvelope, Secret};
use crate::jevent::JEvent;
use crate::profile::Profile;
use crate::settle::SettlementOp;
use crate::swap::SwapOffer;
use crate::types::{
    DilithiumSignature, EntityId, Hash32, LockId, OfferId, ProposalId, SignerId, TokenId,
};

// ── Account transactions ─────────────────────────────────────────────────────

/// One state transition inside an account frame. Direction-carrying fields
/// are explicit so txs survive the right-wins rollback merge into the
/// counterparty's next frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountTx {
    /// Re-price `offdelta` by `amount` from the sender's side.
    DirectPayment {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
        sender_is_left: bool,
    },

    /// The creditor extends (or contracts) the peer's credit line.
    /// `creditor_is_left == true` sets `right_credit_limit`.
    SetCreditLimit {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
        creditor_is_left: bool,
    },

    CreateLock {
        lock: HtlcLock,
    },

    SettleLock {
        lock_id: LockId,
        secret: Secret,
    },

    CancelLock {
        lock_id: LockId,
        reason: String,
    },

    SwapOffer {
        offer: SwapOffer,
    },

    SwapResolve {
        offer_id: OfferId,
        #[serde(with = "xln_codec::sigint")]
        fill_give: I256,
        #[serde(with = "xln_codec::sigint")]
        fill_take: I256,
    },

    SwapCancel {
        offer_id: OfferId,
    },
}

// ── Account wire messages ────────────────────────────────────────────────────

/// One bilateral message between the two ends of an account, carried inside
/// `EntityTx::AccountInput`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountInput {
    /// Peer proposes its next frame.
    AccountFrame { frame: AccountFrame },

    /// Peer applied my proposed frame; carries its counter-signature over
    /// the proof body hash and the nonce+1 pre-sign.
    AccountAck {
        height: u64,
        frame_hash: Hash32,
        signature: DilithiumSignature,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presign_next: Option<DilithiumSignature>,
    },

    /// Standalone proof-body signature (re-sent on recovery paths).
    AccountSignature {
        height: u64,
        frame_hash: Hash32,
        signature: DilithiumSignature,
    },

    /// Preimage reveal propagating a settle upstream.
    HtlcSettle { lock_id: LockId, secret: Secret },

    /// Cancellation propagating a timeout downstream.
    HtlcCancel { lock_id: LockId, reason: String },

    /// Peer-initiated push payment; lands in my mempool with the peer as
    /// sender and rides my next frame.
    DirectPayment {
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },

    SettlementPropose { ops: Vec<SettlementOp> },

    SettlementAccept,

    SettlementReject { reason: String },
}

// ── Entity transactions ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

/// What a passed governance proposal executes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalAction {
    /// Post a message to the entity chat log under the collective identity.
    CollectiveMessage { message: String },
}

/// One transaction in an entity's consensus mempool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityTx {
    Chat {
        from: SignerId,
        message: String,
    },

    OpenAccount {
        peer: EntityId,
    },

    /// Bilateral account message from (or to) `peer`.
    AccountInput {
        peer: EntityId,
        input: AccountInput,
    },

    /// Operator-submitted account transition (credit limits, swaps, …),
    /// queued into the account's mempool for the next bilateral frame.
    AccountTx {
        peer: EntityId,
        tx: AccountTx,
    },

    /// Open a settlement workspace toward `peer` with these ops and send
    /// the proposal across.
    ProposeSettlement {
        peer: EntityId,
        ops: Vec<SettlementOp>,
    },

    /// Single-hop payment over an existing account.
    DirectPayment {
        peer: EntityId,
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
    },

    /// Multi-hop HTLC send: the pre-built onion and the first hop.
    HtlcPayment {
        first_hop: EntityId,
        token_id: TokenId,
        #[serde(with = "xln_codec::sigint")]
        amount: I256,
        hashlock: Hash32,
        /// Route length including sender and recipient; prices the
        /// timelock / reveal-height ladder.
        num_hops: usize,
        envelope: OnionEnvelope,
    },

    Propose {
        proposer: SignerId,
        action: ProposalAction,
    },

    Vote {
        voter: SignerId,
        proposal_id: ProposalId,
        choice: VoteChoice,
    },

    /// Queue a reserve-to-reserve transfer into the outbound jurisdiction
    /// batch.
    ReserveTransfer {
        to: EntityId,
        token_id: TokenId,
        #[serde(with = "xln_codec::bigint")]
        amount: ethnum::U256,
    },

    /// One jurisdiction block's relevant events.
    JEvent {
        block_number: u64,
        block_hash: Hash32,
        events: Vec<JEvent>,
    },

    /// Crontab confirmation that an outbound batch left for the chain:
    /// drains the broadcast slice and stamps the cadence clock.
    BatchFlushed {
        settlements: usize,
        r2r: usize,
        tx_hash: String,
    },

    /// Update this entity's gossip profile.
    SetProfile {
        profile: Profile,
    },
}

impl EntityTx {
    /// Stable tag for logs and `UNKNOWN_TX_TYPE` reporting.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityTx::Chat { .. } => "chat",
            EntityTx::OpenAccount { .. } => "open_account",
            EntityTx::AccountInput { .. } => "account_input",
            EntityTx::AccountTx { .. } => "account_tx",
            EntityTx::ProposeSettlement { .. } => "propose_settlement",
            EntityTx::DirectPayment { .. } => "direct_payment",
            EntityTx::ReserveTransfer { .. } => "reserve_transfer",
            EntityTx::HtlcPayment { .. } => "htlc_payment",
            EntityTx::Propose { .. } => "propose",
            EntityTx::Vote { .. } => "vote",
            EntityTx::JEvent { .. } => "j_event",
            EntityTx::BatchFlushed { .. } => "batch_flushed",
            EntityTx::SetProfile { .. } => "set_profile",
        }
    }
}

// ── Consensus wire messages ──────────────────────────────────────────────────

/// A validator's weighted signature over a proposed frame hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    pub signer_id: SignerId,
    pub frame_hash: Hash32,
    pub signature: DilithiumSignature,
}

/// Proposer → validators after threshold: apply this frame as canonical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotice {
    pub frame: EntityFrame,
    pub signatures: BTreeMap<SignerId, DilithiumSignature>,
}

/// Everything addressed to one entity replica in one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInput {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_txs: Vec<EntityTx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_frame: Option<EntityFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precommits: Vec<Precommit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_notice: Option<CommitNotice>,
}

impl EntityInput {
    pub fn txs(entity_id: EntityId, signer_id: impl Into<SignerId>, txs: Vec<EntityTx>) -> Self {
        Self {
            entity_id,
            signer_id: signer_id.into(),
            entity_txs: txs,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_txs.is_empty()
            && self.proposed_frame.is_none()
            && self.precommits.is_empty()
            && self.commit_notice.is_none()
    }
}
