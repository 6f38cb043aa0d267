use thiserror::Error;

/// All failure modes across the settlement core.
///
/// `code()` yields the stable string used in logs and relay `error` replies.
/// Propagation policy: validation and capacity errors are reported to the
/// originator and the offending input dropped; conservation and proof-body
/// errors are fatal to their account; `ChainUnavailable` never blocks
/// consensus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XlnError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("relay message is not a JSON object")]
    RelayMsgObjectInvalid,

    #[error("relay message has no usable `type` field")]
    RelayMsgTypeInvalid,

    #[error("financial safety check failed: {check}: {detail}")]
    FinancialSafety { check: &'static str, detail: String },

    #[error("delta validation failed for token {token_id}: {detail}")]
    DeltaValidationFailed { token_id: u32, detail: String },

    #[error("invalid route: {detail}")]
    InvalidRoute { detail: String },

    #[error("hop fee {fee} exceeds forwarded amount {amount}")]
    FeeExceedsAmount { fee: String, amount: String },

    #[error("invalid entity reference: {input}")]
    InvalidEntityId { input: String },

    #[error("invalid 32-byte hash: {input}")]
    InvalidHash { input: String },

    #[error("unknown transaction type tag: {tag}")]
    UnknownTxType { tag: String },

    #[error("invalid quorum config: {detail}")]
    InvalidQuorum { detail: String },

    #[error("unknown governance proposal: {id}")]
    UnknownProposal { id: String },

    // ── Capacity / limits ────────────────────────────────────────────────────
    #[error("mempool full ({size} txs)")]
    MempoolFull { size: usize },

    #[error("frame exceeds maximum size: {txs} txs")]
    FrameTooLarge { txs: usize },

    #[error("route length {hops} exceeds maximum of {max} hops")]
    MaxHopsExceeded { hops: usize, max: usize },

    #[error("account quota exceeded: {detail}")]
    AccountQuota { detail: String },

    // ── State ────────────────────────────────────────────────────────────────
    #[error("account is not active (status: {status})")]
    StateInactive { status: String },

    #[error("unknown HTLC lock: {lock_id}")]
    UnknownLock { lock_id: String },

    #[error("lock {lock_id} expired at jurisdiction height {reveal_before}")]
    LockExpired { lock_id: String, reveal_before: u64 },

    #[error("duplicate frame at height {height}")]
    DuplicateFrame { height: u64 },

    #[error("nonce gap: expected {expected}, got {got}")]
    NonceGap { expected: u64, got: u64 },

    #[error("timestamp drift: frame {frame_ts} vs local {local_ts}")]
    TimestampDrift { frame_ts: u64, local_ts: u64 },

    // ── Consensus ────────────────────────────────────────────────────────────
    #[error("proposal timed out at height {height}")]
    ProposalTimeout { height: u64 },

    #[error("signature verification failed for signer {signer}")]
    SignatureInvalid { signer: String },

    #[error("threshold not met: collected {collected}, need {threshold}")]
    ThresholdNotMet { collected: u64, threshold: u64 },

    // ── Conservation ─────────────────────────────────────────────────────────
    #[error("settlement invariant violated for token {token_id}: left + right + collateral = {sum}")]
    SettlementInvariantViolation { token_id: u32, sum: String },

    #[error("proof body hash mismatch: ours {ours}, peer {theirs}")]
    ProofBodyHashMismatch { ours: String, theirs: String },

    // ── External ─────────────────────────────────────────────────────────────
    #[error("jurisdiction chain unavailable: {detail}")]
    ChainUnavailable { detail: String },

    #[error("batch broadcast failed: {detail}")]
    BatchBroadcastFailed { detail: String },

    // ── Serialization ────────────────────────────────────────────────────────
    #[error("codec error: {0}")]
    Codec(String),
}

impl XlnError {
    /// Stable error-code string for logs and wire `error` replies.
    pub fn code(&self) -> String {
        match self {
            XlnError::RelayMsgObjectInvalid => "RELAY_MSG_OBJECT_INVALID".into(),
            XlnError::RelayMsgTypeInvalid => "RELAY_MSG_TYPE_INVALID".into(),
            XlnError::FinancialSafety { check, .. } => format!("FINANCIAL_SAFETY_{check}"),
            XlnError::DeltaValidationFailed { .. } => "DELTA_VALIDATION_FAILED".into(),
            XlnError::InvalidRoute { .. } => "INVALID_ROUTE".into(),
            XlnError::FeeExceedsAmount { .. } => "FEE_EXCEEDS_AMOUNT".into(),
            XlnError::InvalidEntityId { .. } => "INVALID_ENTITY_ID".into(),
            XlnError::InvalidHash { .. } => "INVALID_HASH".into(),
            XlnError::UnknownTxType { .. } => "UNKNOWN_TX_TYPE".into(),
            XlnError::InvalidQuorum { .. } => "INVALID_QUORUM".into(),
            XlnError::UnknownProposal { .. } => "UNKNOWN_PROPOSAL".into(),
            XlnError::MempoolFull { .. } => "MEMPOOL_FULL".into(),
            XlnError::FrameTooLarge { .. } => "FRAME_TOO_LARGE".into(),
            XlnError::MaxHopsExceeded { .. } => "MAX_HOPS_EXCEEDED".into(),
            XlnError::AccountQuota { .. } => "ACCOUNT_QUOTA".into(),
            XlnError::StateInactive { .. } => "STATE_INACTIVE".into(),
            XlnError::UnknownLock { .. } => "UNKNOWN_LOCK".into(),
            XlnError::LockExpired { .. } => "LOCK_EXPIRED".into(),
            XlnError::DuplicateFrame { .. } => "DUPLICATE_FRAME".into(),
            XlnError::NonceGap { .. } => "NONCE_GAP".into(),
            XlnError::TimestampDrift { .. } => "TIMESTAMP_DRIFT".into(),
            XlnError::ProposalTimeout { .. } => "PROPOSAL_TIMEOUT".into(),
            XlnError::SignatureInvalid { .. } => "SIGNATURE_INVALID".into(),
            XlnError::ThresholdNotMet { .. } => "THRESHOLD_NOT_MET".into(),
            XlnError::SettlementInvariantViolation { .. } => {
                "SETTLEMENT_INVARIANT_VIOLATION".into()
            }
            XlnError::ProofBodyHashMismatch { .. } => "PROOFBODY_HASH_MISMATCH".into(),
            XlnError::ChainUnavailable { .. } => "CHAIN_UNAVAILABLE".into(),
            XlnError::BatchBroadcastFailed { .. } => "BATCH_BROADCAST_FAILED".into(),
            XlnError::Codec(_) => "CODEC_ERROR".into(),
        }
    }

    /// Validation / capacity errors: reported, never propagated upward.
    pub fn is_droppable(&self) -> bool {
        !matches!(
            self,
            XlnError::SettlementInvariantViolation { .. } | XlnError::ProofBodyHashMismatch { .. }
        )
    }
}
