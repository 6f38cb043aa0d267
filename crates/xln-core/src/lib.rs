pub mod board;
pub mod config;
pub mod constants;
pub mod delta;
pub mod error;
pub mod frame;
pub mod htlc;
pub mod jbatch;
pub mod jevent;
pub mod profile;
pub mod settle;
pub mod swap;
pub mod tx;
pub mod types;

pub use board::{lazy_entity_id, named_entity_id, Board, BoardSeat, ConsensusConfig, ConsensusMode};
pub use config::{DebugTopic, JurisdictionMode, RuntimeConfig};
pub use constants::*;
pub use delta::Delta;
pub use error::XlnError;
pub use frame::{AccountFrame, EntityFrame};
pub use htlc::{derive_lock_id, HtlcLock, OnionEnvelope, OnionPayload, Secret};
pub use jbatch::{BatchR2r, BatchSettlement, JBatchState};
pub use jevent::{JBlock, JEvent, JEVENT_NAMES};
pub use profile::{AccountSnapshot, Profile, ProfileMetadata, TokenCapacity};
pub use settle::{
    PendingWithdrawal, ProofHeader, RebalancePolicy, SettlementDiff, SettlementOp,
    SettlementStatus, SettlementWorkspace,
};
pub use swap::SwapOffer;
pub use tx::{
    AccountInput, AccountTx, CommitNotice, EntityInput, EntityTx, Precommit, ProposalAction,
    VoteChoice,
};
pub use types::{
    canonical_pair, channel_key, parse_entity_ref, DilithiumPublicKey, DilithiumSignature,
    EntityId, Hash32, JHeight, KyberPublicKey, LockId, OfferId, ProposalId, SignerId, Timestamp,
    TokenId,
};
