use std::collections::BTreeMap;

use ethnum::{I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use xln_core::constants::{ACCOUNT_ACK_TIMEOUT_MS, FRAME_AGE_MS};
use xln_core::{
    canonical_pair, AccountFrame, AccountInput, AccountTx, Delta, DilithiumSignature, EntityId,
    Hash32, HtlcLock, JHeight, LockId, OfferId, OnionEnvelope, PendingWithdrawal, ProofHeader,
    RebalancePolicy, Secret, SettlementDiff, SettlementStatus, SettlementWorkspace, SwapOffer,
    Timestamp, TokenId, XlnError,
};
use xln_crypto::{hashlock_of, EncryptionKeyPair, KeyPair};

use crate::capacity::derive;
use crate::proof::{build_proof_body, build_proof_header, header_sign_bytes, proof_body_hash};
use crate::settle::{auto_approves, compile_ops};

// ── Context & effects ────────────────────────────────────────────────────────

/// Per-call context handed down from the entity layer. `signer` is present
/// only on the proposer replica; effects carrying signatures are built
/// there and discarded everywhere else, so replica state never diverges.
pub struct AccountCtx<'a> {
    pub now: Timestamp,
    pub j_height: JHeight,
    pub depository: String,
    pub signer: Option<&'a KeyPair>,
    pub encryption: Option<&'a EncryptionKeyPair>,
    pub require_sealed_onions: bool,
}

impl AccountCtx<'_> {
    fn sign(&self, bytes: &[u8]) -> Option<DilithiumSignature> {
        self.signer.map(|kp| kp.sign(bytes))
    }
}

/// What applying account inputs asks the entity layer to do next.
#[derive(Clone, Debug)]
pub enum AccountEffect {
    /// Send a bilateral message to this account's peer.
    SendToPeer(AccountInput),
    /// Create the next-hop lock on the account toward `next_hop`.
    /// `inbound_lock_id` ties the forward to the lock we just received so
    /// the settle can propagate back upstream.
    ForwardHtlc {
        next_hop: EntityId,
        inbound_lock_id: LockId,
        token_id: TokenId,
        amount: I256,
        hashlock: Hash32,
        reveal_before_height: JHeight,
        timelock: Timestamp,
        envelope: OnionEnvelope,
    },
    /// A preimage surfaced (final-recipient reveal or downstream settle);
    /// the entity resolves matching upstream locks and origin payments.
    SecretLearned { hashlock: Hash32, secret: Secret },
    /// Value arrived for this entity on this account.
    PaymentReceived { token_id: TokenId, amount: I256 },
    /// An accepted settlement, ready for the jurisdiction batch.
    EnqueueSettlement { diffs: Vec<SettlementDiff> },
}

// ── Machine state ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disputed,
}

/// Default credit lines seeded into a token's delta on first touch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCreditLimit {
    #[serde(with = "xln_codec::bigint")]
    pub left: U256,
    #[serde(with = "xln_codec::bigint")]
    pub right: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFrame {
    pub frame: AccountFrame,
    pub sent_at: Timestamp,
}

impl PendingFrame {
    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.sent_at)
    }
}

/// An on-chain dispute in flight for this account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeState {
    pub nonce: u64,
    pub started_at: Timestamp,
}

/// The two-party deterministic ledger for one (left, right) entity pair,
/// held by one of the two sides. Canonical by construction: `left < right`
/// on the 32-byte form, and every stored quantity is in the left
/// perspective, so both sides hold byte-identical consensus state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMachine {
    pub left_entity: EntityId,
    pub right_entity: EntityId,
    pub owner_is_left: bool,
    pub status: AccountStatus,

    pub mempool: Vec<AccountTx>,
    pub current_frame: AccountFrame,
    pub pending_frame: Option<PendingFrame>,

    pub deltas: BTreeMap<TokenId, Delta>,
    pub locks: BTreeMap<LockId, HtlcLock>,
    pub swap_offers: BTreeMap<OfferId, SwapOffer>,
    pub global_credit_limits: BTreeMap<TokenId, GlobalCreditLimit>,

    pub proof_header: ProofHeader,
    pub proof_body_hash: Hash32,
    /// Peer's latest proof-header signature and its nonce.
    pub peer_signature: Option<(u64, DilithiumSignature)>,
    /// Peer's pre-sign for nonce + 1.
    pub peer_presign: Option<DilithiumSignature>,

    pub frame_history: Vec<AccountFrame>,
    pub rollback_count: u64,
    pub last_rollback_frame_hash: Option<Hash32>,

    pub last_finalized_j_height: JHeight,
    pub on_chain_settlement_nonce: u64,
    pub pending_withdrawals: Vec<PendingWithdrawal>,
    #[serde(with = "xln_codec::bigint_map")]
    pub requested_rebalance: BTreeMap<TokenId, U256>,
    pub rebalance_policy: RebalancePolicy,
    pub settlement_workspace: Option<SettlementWorkspace>,
    pub active_dispute: Option<DisputeState>,
}

/// Hashed view of the off-chain position; the account frame `state_hash`
/// commits to exactly this.
#[derive(Serialize)]
struct PositionView<'a> {
    deltas: &'a BTreeMap<TokenId, Delta>,
    locks: &'a BTreeMap<LockId, HtlcLock>,
    swap_offers: &'a BTreeMap<OfferId, SwapOffer>,
}

impl AccountMachine {
    /// Open the canonical machine between `owner` and `peer`. Both ends
    /// construct byte-identical genesis state regardless of when they
    /// learn about the account.
    pub fn open(owner: EntityId, peer: EntityId, depository: &str) -> Self {
        let (left, right) = canonical_pair(owner, peer);
        let owner_is_left = owner == left;

        let genesis = AccountFrame {
            height: 0,
            timestamp: 0,
            j_height: 0,
            account_txs: Vec::new(),
            prev_frame_hash: Hash32::ZERO,
            state_hash: empty_position_hash(),
            token_ids: Vec::new(),
            deltas: Vec::new(),
        };

        let body = build_proof_body(&BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        let body_hash = proof_body_hash(&body);

        Self {
            left_entity: left,
            right_entity: right,
            owner_is_left,
            status: AccountStatus::Active,
            mempool: Vec::new(),
            current_frame: genesis,
            pending_frame: None,
            deltas: BTreeMap::new(),
            locks: BTreeMap::new(),
            swap_offers: BTreeMap::new(),
            global_credit_limits: BTreeMap::new(),
            proof_header: build_proof_header(depository, &left, &right, 0, body_hash),
            proof_body_hash: body_hash,
            peer_signature: None,
            peer_presign: None,
            frame_history: Vec::new(),
            rollback_count: 0,
            last_rollback_frame_hash: None,
            last_finalized_j_height: 0,
            on_chain_settlement_nonce: 0,
            pending_withdrawals: Vec::new(),
            requested_rebalance: BTreeMap::new(),
            rebalance_policy: RebalancePolicy::default(),
            settlement_workspace: None,
            active_dispute: None,
        }
    }

    pub fn peer(&self) -> EntityId {
        if self.owner_is_left {
            self.right_entity
        } else {
            self.left_entity
        }
    }

    pub fn owner(&self) -> EntityId {
        if self.owner_is_left {
            self.left_entity
        } else {
            self.right_entity
        }
    }

    /// The owner's perspective on a token position: positive = net sent
    /// (owed to peer), the negation of the canonical left claim for the
    /// left seat.
    pub fn net_outflow(&self, token_id: TokenId) -> I256 {
        let total = self.deltas.get(&token_id).map(|d| d.total()).unwrap_or(I256::ZERO);
        if self.owner_is_left {
            -total
        } else {
            total
        }
    }

    /// Usable outbound capacity for the owner on `token_id`.
    pub fn out_capacity(&self, token_id: TokenId) -> I256 {
        self.deltas
            .get(&token_id)
            .map(|d| derive(d, self.owner_is_left).out_capacity)
            .unwrap_or(I256::ZERO)
    }

    pub fn in_capacity(&self, token_id: TokenId) -> I256 {
        self.deltas
            .get(&token_id)
            .map(|d| derive(d, self.owner_is_left).in_capacity)
            .unwrap_or(I256::ZERO)
    }

    fn position_hash(&self) -> Hash32 {
        let view = PositionView {
            deltas: &self.deltas,
            locks: &self.locks,
            swap_offers: &self.swap_offers,
        };
        let value = xln_codec::encode_tagged(&view).expect("position encoding is infallible");
        Hash32::from_bytes(xln_codec::keccak_value(&value))
    }

    /// Fetch-or-seed the delta for a token, applying global credit limits
    /// on first touch.
    pub(crate) fn delta_mut(&mut self, token_id: TokenId) -> &mut Delta {
        if !self.deltas.contains_key(&token_id) {
            let mut delta = Delta::new(token_id);
            if let Some(global) = self.global_credit_limits.get(&token_id) {
                delta.left_credit_limit = u256_to_i256(global.left);
                delta.right_credit_limit = u256_to_i256(global.right);
            }
            self.deltas.insert(token_id, delta);
        }
        self.deltas.get_mut(&token_id).expect("just inserted")
    }

    // ── Mempool ──────────────────────────────────────────────────────────────

    pub fn add_account_tx(&mut self, tx: AccountTx) -> Result<(), XlnError> {
        if self.status != AccountStatus::Active {
            return Err(XlnError::StateInactive { status: format!("{:?}", self.status) });
        }
        self.mempool.push(tx);
        Ok(())
    }

    /// Enqueue `CancelLock` sweeps for every expired lock this side sent.
    /// Returns how many sweeps were queued.
    pub fn sweep_expired_locks(&mut self, j_height: JHeight) -> usize {
        let already: Vec<LockId> = self
            .mempool
            .iter()
            .filter_map(|tx| match tx {
                AccountTx::CancelLock { lock_id, .. } => Some(*lock_id),
                _ => None,
            })
            .collect();
        let expired: Vec<LockId> = self
            .locks
            .values()
            .filter(|lock| {
                lock.is_expired(j_height)
                    && lock.sender_is_left == self.owner_is_left
                    && !already.contains(&lock.lock_id)
            })
            .map(|lock| lock.lock_id)
            .collect();
        let count = expired.len();
        for lock_id in expired {
            self.mempool.push(AccountTx::CancelLock {
                lock_id,
                reason: "expired".to_string(),
            });
        }
        count
    }

    // ── Frame proposal ───────────────────────────────────────────────────────

    /// Propose the next account frame from the current mempool. Dry-runs on
    /// a clone; a failing tx is rejected from the mempool and the attempt
    /// aborted without state mutation.
    pub fn try_propose_frame(
        &mut self,
        ctx: &AccountCtx<'_>,
    ) -> Result<Option<AccountEffect>, XlnError> {
        if self.status != AccountStatus::Active
            || self.mempool.is_empty()
            || self.pending_frame.is_some()
        {
            return Ok(None);
        }

        let mut trial = self.clone();
        for (i, tx) in self.mempool.iter().enumerate() {
            if let Err(err) = trial.apply_tx(tx, ctx.j_height, ctx.now, ctx) {
                warn!(
                    account = %self.peer(),
                    tx_index = i,
                    code = %err.code(),
                    "account tx failed dry-run, rejecting from mempool"
                );
                self.mempool.remove(i);
                return Err(err);
            }
        }

        let txs: Vec<AccountTx> = std::mem::take(&mut self.mempool);
        let frame = AccountFrame {
            height: self.current_frame.height + 1,
            timestamp: ctx.now,
            j_height: ctx.j_height,
            account_txs: txs,
            prev_frame_hash: self.current_frame.hash(),
            state_hash: trial.position_hash(),
            token_ids: trial.deltas.keys().copied().collect(),
            deltas: trial.deltas.values().cloned().collect(),
        };

        debug!(
            account = %self.peer(),
            height = frame.height,
            txs = frame.account_txs.len(),
            "proposing account frame"
        );
        self.pending_frame = Some(PendingFrame { frame: frame.clone(), sent_at: ctx.now });
        Ok(Some(AccountEffect::SendToPeer(AccountInput::AccountFrame { frame })))
    }

    /// Re-send the pending proposal if the peer has not acknowledged within
    /// `ACCOUNT_ACK_TIMEOUT_MS`.
    pub fn resend_pending(&self, now: Timestamp) -> Option<AccountInput> {
        let pending = self.pending_frame.as_ref()?;
        if pending.age(now) >= ACCOUNT_ACK_TIMEOUT_MS {
            Some(AccountInput::AccountFrame { frame: pending.frame.clone() })
        } else {
            None
        }
    }

    // ── Input dispatch ───────────────────────────────────────────────────────

    pub fn apply_account_input(
        &mut self,
        input: AccountInput,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if self.status == AccountStatus::Disputed {
            return Err(XlnError::StateInactive { status: "disputed".to_string() });
        }
        match input {
            AccountInput::AccountFrame { frame } => self.handle_peer_frame(frame, ctx),
            AccountInput::AccountAck { height, frame_hash, signature, presign_next } => {
                self.handle_ack(height, frame_hash, signature, presign_next, ctx)
            }
            AccountInput::AccountSignature { height, signature, .. } => {
                self.peer_signature = Some((height, signature));
                Ok(Vec::new())
            }
            AccountInput::HtlcSettle { lock_id, secret } => self.handle_htlc_settle(lock_id, secret),
            AccountInput::HtlcCancel { lock_id, reason } => {
                self.handle_htlc_cancel(lock_id, reason, ctx)
            }
            AccountInput::DirectPayment { token_id, amount } => {
                // Peer-initiated push payment rides our next frame.
                self.add_account_tx(AccountTx::DirectPayment {
                    token_id,
                    amount,
                    sender_is_left: !self.owner_is_left,
                })?;
                Ok(Vec::new())
            }
            AccountInput::SettlementPropose { ops } => self.handle_settlement_propose(ops, ctx),
            AccountInput::SettlementAccept => self.handle_settlement_accept(ctx),
            AccountInput::SettlementReject { reason } => {
                info!(account = %self.peer(), %reason, "settlement rejected by peer");
                self.clear_settlement_holds();
                self.settlement_workspace = None;
                Ok(Vec::new())
            }
        }
    }

    // ── Peer frame path ──────────────────────────────────────────────────────

    fn handle_peer_frame(
        &mut self,
        frame: AccountFrame,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        let expected_height = self.current_frame.height + 1;

        // Duplicate of the frame we already committed: re-ack idempotently.
        if frame.height == self.current_frame.height && frame.hash() == self.current_frame.hash() {
            return Ok(self.ack_effects(ctx));
        }

        if frame.height != expected_height {
            return Err(XlnError::NonceGap { expected: expected_height, got: frame.height });
        }

        // Simultaneous proposal at equal height: right wins, left rolls back.
        if let Some(pending) = self.pending_frame.take() {
            if self.owner_is_left {
                info!(
                    account = %self.peer(),
                    height = frame.height,
                    "simultaneous proposal, rolling back (right wins)"
                );
                self.last_rollback_frame_hash = Some(pending.frame.hash());
                self.rollback_count += 1;
                // Restore our txs at the head of the mempool, original order.
                let mut restored = pending.frame.account_txs;
                restored.append(&mut self.mempool);
                self.mempool = restored;
            } else {
                // We are right: our proposal stands, the peer will roll back.
                self.pending_frame = Some(pending);
                debug!(account = %self.peer(), height = frame.height, "dropping colliding left frame");
                return Ok(Vec::new());
            }
        }

        if frame.prev_frame_hash != self.current_frame.hash() {
            return Err(XlnError::DuplicateFrame { height: frame.height });
        }

        // Dry-run the peer's txs and verify the declared post-state.
        let mut trial = self.clone();
        for tx in &frame.account_txs {
            trial.apply_tx(tx, frame.j_height, frame.timestamp, ctx)?;
        }
        let our_hash = trial.position_hash();
        if our_hash != frame.state_hash {
            warn!(
                account = %self.peer(),
                ours = %our_hash,
                theirs = %frame.state_hash,
                "peer frame state divergence, account disputed"
            );
            self.status = AccountStatus::Disputed;
            return Err(XlnError::ProofBodyHashMismatch {
                ours: our_hash.to_hex(),
                theirs: frame.state_hash.to_hex(),
            });
        }

        // Commit: apply for real, collecting receiver-side effects.
        let mut effects = Vec::new();
        for tx in &frame.account_txs {
            effects.extend(self.apply_tx(tx, frame.j_height, frame.timestamp, ctx)?);
        }
        self.commit_frame(frame, ctx.now);
        effects.extend(self.ack_effects(ctx));
        Ok(effects)
    }

    /// Build the ACK (with proof-header signature and nonce+1 pre-sign) for
    /// the frame we just committed. Empty on non-signing replicas.
    fn ack_effects(&self, ctx: &AccountCtx<'_>) -> Vec<AccountEffect> {
        let header_sig = ctx.sign(&header_sign_bytes(&self.proof_header));
        let presign = {
            let mut next = self.proof_header.clone();
            next.nonce += 1;
            ctx.sign(&header_sign_bytes(&next))
        };
        match header_sig {
            Some(signature) => vec![AccountEffect::SendToPeer(AccountInput::AccountAck {
                height: self.current_frame.height,
                frame_hash: self.current_frame.hash(),
                signature,
                presign_next: presign,
            })],
            None => Vec::new(),
        }
    }

    fn handle_ack(
        &mut self,
        height: u64,
        frame_hash: Hash32,
        signature: DilithiumSignature,
        presign_next: Option<DilithiumSignature>,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        // ACK for an already-committed frame (collision path): keep the sig.
        if self.pending_frame.is_none() {
            if height == self.current_frame.height && frame_hash == self.current_frame.hash() {
                self.peer_signature = Some((self.proof_header.nonce, signature));
                self.peer_presign = presign_next;
            }
            return Ok(Vec::new());
        }

        let pending = self.pending_frame.as_ref().expect("checked above");
        if pending.frame.height != height || pending.frame.hash() != frame_hash {
            debug!(account = %self.peer(), height, "stale ack discarded");
            return Ok(Vec::new());
        }

        let pending = self.pending_frame.take().expect("checked above");
        let mut effects = Vec::new();
        for tx in &pending.frame.account_txs {
            effects.extend(self.apply_tx(tx, pending.frame.j_height, pending.frame.timestamp, ctx)?);
        }
        self.commit_frame(pending.frame, ctx.now);
        self.peer_signature = Some((self.proof_header.nonce, signature));
        self.peer_presign = presign_next;
        info!(
            account = %self.peer(),
            height = self.current_frame.height,
            "account frame committed"
        );
        Ok(effects)
    }

    /// Shared commit tail: replace the current frame, refresh the proof
    /// objects, prune history.
    fn commit_frame(&mut self, frame: AccountFrame, now: Timestamp) {
        self.frame_history.push(self.current_frame.clone());
        self.current_frame = frame;

        let body = build_proof_body(&self.deltas, &self.locks, &self.swap_offers);
        self.proof_body_hash = proof_body_hash(&body);
        self.proof_header = build_proof_header(
            &self.proof_header.depository,
            &self.left_entity,
            &self.right_entity,
            self.current_frame.height,
            self.proof_body_hash,
        );

        self.frame_history
            .retain(|f| now.saturating_sub(f.timestamp) <= FRAME_AGE_MS);
    }

    // ── HTLC message paths ───────────────────────────────────────────────────

    /// Downstream revealed the preimage for a lock we sent: queue the
    /// settling tx and surface the secret for upstream propagation.
    fn handle_htlc_settle(
        &mut self,
        lock_id: LockId,
        secret: Secret,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        let lock = self
            .locks
            .get(&lock_id)
            .ok_or(XlnError::UnknownLock { lock_id: lock_id.to_hex() })?;
        if hashlock_of(&secret) != lock.hashlock {
            return Err(XlnError::FinancialSafety {
                check: "HASHLOCK_MISMATCH",
                detail: format!("lock {lock_id}"),
            });
        }
        let hashlock = lock.hashlock;
        self.add_account_tx(AccountTx::SettleLock { lock_id, secret })?;
        Ok(vec![AccountEffect::SecretLearned { hashlock, secret }])
    }

    /// Downstream refused or timed out a lock we sent: sweep it if it is
    /// already expired, otherwise queue the cancel for the next frame.
    fn handle_htlc_cancel(
        &mut self,
        lock_id: LockId,
        reason: String,
        _ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if !self.locks.contains_key(&lock_id) {
            return Err(XlnError::UnknownLock { lock_id: lock_id.to_hex() });
        }
        let already_queued = self.mempool.iter().any(|tx| {
            matches!(tx, AccountTx::CancelLock { lock_id: queued, .. } if *queued == lock_id)
        });
        if !already_queued {
            self.add_account_tx(AccountTx::CancelLock { lock_id, reason })?;
        }
        Ok(Vec::new())
    }

    // ── Settlement message paths ─────────────────────────────────────────────

    fn handle_settlement_propose(
        &mut self,
        ops: Vec<xln_core::SettlementOp>,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if self.settlement_workspace.is_some() {
            return Err(XlnError::AccountQuota {
                detail: "settlement workspace already in use".to_string(),
            });
        }
        let proposer_is_left = !self.owner_is_left;
        let diffs = compile_ops(&ops, proposer_is_left)?;

        self.settlement_workspace = Some(SettlementWorkspace {
            proposer_is_left,
            ops,
            status: SettlementStatus::Proposed,
            created_at: ctx.now,
        });

        if auto_approves(&diffs, self.owner_is_left) {
            let workspace = self.settlement_workspace.as_mut().expect("just set");
            workspace.status = SettlementStatus::Accepted;
            debug!(account = %self.peer(), "settlement auto-approved");
            // The proposer alone broadcasts the compiled batch.
            Ok(vec![AccountEffect::SendToPeer(AccountInput::SettlementAccept)])
        } else {
            // Leave for the manual approval surface.
            Ok(Vec::new())
        }
    }

    /// Open a settlement workspace with our ops and propose it to the peer.
    pub fn propose_settlement(
        &mut self,
        ops: Vec<xln_core::SettlementOp>,
        now: Timestamp,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if self.status != AccountStatus::Active {
            return Err(XlnError::StateInactive { status: format!("{:?}", self.status) });
        }
        if self.settlement_workspace.is_some() {
            return Err(XlnError::AccountQuota {
                detail: "settlement workspace already in use".to_string(),
            });
        }
        // Compile up front so a broken op list never leaves this side.
        compile_ops(&ops, self.owner_is_left)?;
        self.settlement_workspace = Some(SettlementWorkspace {
            proposer_is_left: self.owner_is_left,
            ops: ops.clone(),
            status: SettlementStatus::Proposed,
            created_at: now,
        });
        Ok(vec![AccountEffect::SendToPeer(AccountInput::SettlementPropose { ops })])
    }

    fn handle_settlement_accept(
        &mut self,
        _ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        let workspace = self.settlement_workspace.as_mut().ok_or(XlnError::AccountQuota {
            detail: "no settlement proposed".to_string(),
        })?;
        if workspace.proposer_is_left != self.owner_is_left {
            return Err(XlnError::AccountQuota {
                detail: "acceptance for a settlement we did not propose".to_string(),
            });
        }
        workspace.status = SettlementStatus::Accepted;
        let diffs = compile_ops(&workspace.ops, workspace.proposer_is_left)?;
        Ok(vec![AccountEffect::EnqueueSettlement { diffs }])
    }

    /// The counterparty answers a manually-reviewed settlement proposal.
    pub fn answer_settlement(
        &mut self,
        accept: bool,
        reason: String,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        let workspace = self.settlement_workspace.as_mut().ok_or(XlnError::AccountQuota {
            detail: "no settlement proposed".to_string(),
        })?;
        if accept {
            workspace.status = SettlementStatus::Accepted;
            Ok(vec![AccountEffect::SendToPeer(AccountInput::SettlementAccept)])
        } else {
            self.clear_settlement_holds();
            self.settlement_workspace = None;
            Ok(vec![AccountEffect::SendToPeer(AccountInput::SettlementReject { reason })])
        }
    }

    /// Apply an `AccountSettled` jurisdiction event: move collateral and
    /// ondelta, bump the settlement nonce, release holds, and pre-sign the
    /// next nonce so a valid dispute proof exists immediately.
    pub fn apply_settled(
        &mut self,
        diffs: &[SettlementDiff],
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        for diff in diffs {
            if !diff.conserves() {
                return Err(XlnError::SettlementInvariantViolation {
                    token_id: diff.token_id,
                    sum: (diff.left_diff + diff.right_diff + diff.collateral_diff).to_string(),
                });
            }
            let delta = self.delta_mut(diff.token_id);
            delta.collateral += diff.collateral_diff;
            delta.ondelta += diff.ondelta_diff;
        }
        self.on_chain_settlement_nonce += 1;
        self.clear_settlement_holds();
        self.settlement_workspace = None;

        let mut effects = Vec::new();
        let mut next = self.proof_header.clone();
        next.nonce += 1;
        if let Some(presign) = ctx.sign(&header_sign_bytes(&next)) {
            effects.push(AccountEffect::SendToPeer(AccountInput::AccountSignature {
                height: next.nonce,
                frame_hash: self.proof_body_hash,
                signature: presign,
            }));
        }
        Ok(effects)
    }

    fn clear_settlement_holds(&mut self) {
        for delta in self.deltas.values_mut() {
            delta.left_settle_hold = I256::ZERO;
            delta.right_settle_hold = I256::ZERO;
        }
    }

    /// Record a dispute observed on-chain; further txs are suspended.
    pub fn mark_disputed(&mut self, nonce: u64, now: Timestamp) {
        self.status = AccountStatus::Disputed;
        self.active_dispute = Some(DisputeState { nonce, started_at: now });
    }
}

fn empty_position_hash() -> Hash32 {
    let deltas: BTreeMap<TokenId, Delta> = BTreeMap::new();
    let locks: BTreeMap<LockId, HtlcLock> = BTreeMap::new();
    let swap_offers: BTreeMap<OfferId, SwapOffer> = BTreeMap::new();
    let view = PositionView { deltas: &deltas, locks: &locks, swap_offers: &swap_offers };
    let value = xln_codec::encode_tagged(&view).expect("position encoding is infallible");
    Hash32::from_bytes(xln_codec::keccak_value(&value))
}

pub(crate) fn u256_to_i256(v: U256) -> I256 {
    I256::from_str_radix(&v.to_string(), 10).unwrap_or(I256::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_core::AccountTx;

    fn ids() -> (EntityId, EntityId) {
        (EntityId::from_number(1), EntityId::from_number(2))
    }

    fn ctx<'a>(now: Timestamp, signer: Option<&'a KeyPair>) -> AccountCtx<'a> {
        AccountCtx {
            now,
            j_height: 0,
            depository: "0xdepository".to_string(),
            signer,
            encryption: None,
            require_sealed_onions: false,
        }
    }

    /// Deliver `SendToPeer` effects into the other machine until both sides
    /// go quiet; returns every non-wire effect observed.
    fn pump(
        a: &mut AccountMachine,
        b: &mut AccountMachine,
        a_key: &KeyPair,
        b_key: &KeyPair,
        now: Timestamp,
    ) -> Vec<AccountEffect> {
        let mut observed = Vec::new();
        let mut to_b: Vec<AccountInput> = Vec::new();
        let mut to_a: Vec<AccountInput> = Vec::new();

        if let Ok(Some(AccountEffect::SendToPeer(msg))) = a.try_propose_frame(&ctx(now, Some(a_key)))
        {
            to_b.push(msg);
        }
        if let Ok(Some(AccountEffect::SendToPeer(msg))) = b.try_propose_frame(&ctx(now, Some(b_key)))
        {
            to_a.push(msg);
        }

        for _ in 0..16 {
            if to_a.is_empty() && to_b.is_empty() {
                break;
            }
            let mut next_to_a = Vec::new();
            let mut next_to_b = Vec::new();
            for msg in to_b.drain(..) {
                if let Ok(effects) = b.apply_account_input(msg, &ctx(now, Some(b_key))) {
                    for effect in effects {
                        match effect {
                            AccountEffect::SendToPeer(m) => next_to_a.push(m),
                            other => observed.push(other),
                        }
                    }
                }
            }
            for msg in to_a.drain(..) {
                if let Ok(effects) = a.apply_account_input(msg, &ctx(now, Some(a_key))) {
                    for effect in effects {
                        match effect {
                            AccountEffect::SendToPeer(m) => next_to_b.push(m),
                            other => observed.push(other),
                        }
                    }
                }
            }
            // Newly unblocked proposals (e.g. after a rollback).
            if let Ok(Some(AccountEffect::SendToPeer(msg))) =
                a.try_propose_frame(&ctx(now, Some(a_key)))
            {
                next_to_b.push(msg);
            }
            if let Ok(Some(AccountEffect::SendToPeer(msg))) =
                b.try_propose_frame(&ctx(now, Some(b_key)))
            {
                next_to_a.push(msg);
            }
            to_a = next_to_a;
            to_b = next_to_b;
        }
        observed
    }

    #[test]
    fn canonical_ordering_on_open() {
        let (e1, e2) = ids();
        let a = AccountMachine::open(e2, e1, "0xdep");
        assert_eq!(a.left_entity, e1);
        assert_eq!(a.right_entity, e2);
        assert!(!a.owner_is_left);
        let b = AccountMachine::open(e1, e2, "0xdep");
        // Both ends build byte-identical genesis consensus state.
        assert_eq!(a.current_frame, b.current_frame);
        assert_eq!(a.proof_body_hash, b.proof_body_hash);
    }

    #[test]
    fn direct_payment_round_trip() {
        let (e1, e2) = ids();
        let a_key = KeyPair::generate();
        let b_key = KeyPair::generate();
        let mut a = AccountMachine::open(e1, e2, "0xdep");
        let mut b = AccountMachine::open(e2, e1, "0xdep");

        // Both sides extend 1_000_000 of credit to the other.
        for m in [&mut a, &mut b] {
            m.add_account_tx(AccountTx::SetCreditLimit {
                token_id: 1,
                amount: I256::from(1_000_000),
                creditor_is_left: true,
            })
            .unwrap();
            m.add_account_tx(AccountTx::SetCreditLimit {
                token_id: 1,
                amount: I256::from(1_000_000),
                creditor_is_left: false,
            })
            .unwrap();
        }
        // Right-wins resolves the simultaneous limit frames.
        pump(&mut a, &mut b, &a_key, &b_key, 1_000);

        a.add_account_tx(AccountTx::DirectPayment {
            token_id: 1,
            amount: I256::from(50_000),
            sender_is_left: true,
        })
        .unwrap();
        let effects = pump(&mut a, &mut b, &a_key, &b_key, 2_000);

        assert_eq!(a.net_outflow(1), I256::from(50_000));
        assert_eq!(b.net_outflow(1), I256::from(-50_000));
        assert_eq!(a.net_outflow(1) + b.net_outflow(1), I256::ZERO);
        assert_eq!(a.current_frame.hash(), b.current_frame.hash());
        assert!(effects
            .iter()
            .any(|e| matches!(e, AccountEffect::PaymentReceived { amount, .. } if *amount == I256::from(50_000))));
    }

    #[test]
    fn right_wins_on_simultaneous_proposals() {
        let (e1, e2) = ids();
        let a_key = KeyPair::generate();
        let b_key = KeyPair::generate();
        let mut left = AccountMachine::open(e1, e2, "0xdep");
        let mut right = AccountMachine::open(e2, e1, "0xdep");

        left.add_account_tx(AccountTx::SetCreditLimit {
            token_id: 1,
            amount: I256::from(10),
            creditor_is_left: true,
        })
        .unwrap();
        right
            .add_account_tx(AccountTx::SetCreditLimit {
                token_id: 1,
                amount: I256::from(20),
                creditor_is_left: false,
            })
            .unwrap();

        // Both propose height 1 simultaneously.
        let to_right = left.try_propose_frame(&ctx(100, Some(&a_key))).unwrap().unwrap();
        let to_left = right.try_propose_frame(&ctx(100, Some(&b_key))).unwrap().unwrap();

        // Right drops left's colliding frame.
        let (AccountEffect::SendToPeer(left_frame), AccountEffect::SendToPeer(right_frame)) =
            (to_right, to_left)
        else {
            panic!("expected frame proposals");
        };
        let effects = right
            .apply_account_input(left_frame, &ctx(101, Some(&b_key)))
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(right.rollback_count, 0);

        // Left rolls back and adopts right's frame.
        left.apply_account_input(right_frame, &ctx(101, Some(&a_key))).unwrap();
        assert_eq!(left.rollback_count, 1);
        assert_eq!(left.rollback_count, right.rollback_count + 1);
        assert_eq!(left.current_frame.height, 1);
        // Left's own tx is back at the head of its mempool.
        assert!(matches!(
            left.mempool.first(),
            Some(AccountTx::SetCreditLimit { amount, .. }) if *amount == I256::from(10)
        ));
    }

    #[test]
    fn disputed_account_rejects_txs() {
        let (e1, e2) = ids();
        let mut a = AccountMachine::open(e1, e2, "0xdep");
        a.mark_disputed(3, 500);
        let err = a
            .add_account_tx(AccountTx::DirectPayment {
                token_id: 1,
                amount: I256::ONE,
                sender_is_left: true,
            })
            .unwrap_err();
        assert_eq!(err.code(), "STATE_INACTIVE");
    }

    #[test]
    fn swap_offer_partial_fill_and_cancel() {
        let (e1, e2) = ids();
        let a_key = KeyPair::generate();
        let b_key = KeyPair::generate();
        let mut a = AccountMachine::open(e1, e2, "0xdep");
        let mut b = AccountMachine::open(e2, e1, "0xdep");

        // Credit on both tokens, both directions.
        for m in [&mut a, &mut b] {
            for token_id in [1u32, 2] {
                for creditor_is_left in [true, false] {
                    m.add_account_tx(AccountTx::SetCreditLimit {
                        token_id,
                        amount: I256::from(10_000),
                        creditor_is_left,
                    })
                    .unwrap();
                }
            }
        }
        pump(&mut a, &mut b, &a_key, &b_key, 1_000);

        // Left offers 100 of token 1 for 200 of token 2.
        let offer_id = Hash32::from_bytes([5u8; 32]);
        a.add_account_tx(AccountTx::SwapOffer {
            offer: xln_core::SwapOffer {
                offer_id,
                owner_is_left: true,
                give_token: 1,
                give_amount: I256::from(100),
                take_token: 2,
                take_amount: I256::from(200),
                filled_give: I256::ZERO,
                created_at: 1_000,
            },
        })
        .unwrap();
        pump(&mut a, &mut b, &a_key, &b_key, 2_000);

        // The unfilled give side is held against left.
        assert_eq!(a.deltas.get(&1).unwrap().left_swap_hold, I256::from(100));

        // Right fills half at the offered price.
        b.add_account_tx(AccountTx::SwapResolve {
            offer_id,
            fill_give: I256::from(50),
            fill_take: I256::from(100),
        })
        .unwrap();
        pump(&mut a, &mut b, &a_key, &b_key, 3_000);

        for m in [&a, &b] {
            // Token 1 moved owner → resolver, token 2 the other way.
            assert_eq!(m.deltas.get(&1).unwrap().offdelta, I256::from(-50));
            assert_eq!(m.deltas.get(&2).unwrap().offdelta, I256::from(100));
            assert_eq!(m.deltas.get(&1).unwrap().left_swap_hold, I256::from(50));
            assert_eq!(m.swap_offers.get(&offer_id).unwrap().remaining_give(), I256::from(50));
        }

        // Owner cancels the rest: hold released, offer gone.
        a.add_account_tx(AccountTx::SwapCancel { offer_id }).unwrap();
        pump(&mut a, &mut b, &a_key, &b_key, 4_000);
        assert!(a.swap_offers.is_empty());
        assert_eq!(a.deltas.get(&1).unwrap().left_swap_hold, I256::ZERO);
        assert_eq!(a.current_frame.hash(), b.current_frame.hash());
    }

    #[test]
    fn settlement_auto_approval_flow() {
        let (e1, e2) = ids();
        let a_key = KeyPair::generate();
        let mut a = AccountMachine::open(e1, e2, "0xdep");
        let mut b = AccountMachine::open(e2, e1, "0xdep");

        // Left proposes funding collateral from its own reserve.
        let ops = vec![xln_core::SettlementOp::R2c { token_id: 1, amount: I256::from(500) }];
        let effects = a.propose_settlement(ops.clone(), 100).unwrap();
        let AccountEffect::SendToPeer(proposal) = effects.into_iter().next().unwrap() else {
            panic!("expected proposal message");
        };

        // Right auto-approves: reserve and share untouched.
        let effects = b.apply_account_input(proposal, &ctx(100, None)).unwrap();
        assert!(matches!(
            effects.as_slice(),
            [AccountEffect::SendToPeer(AccountInput::SettlementAccept)]
        ));

        // The proposer alone compiles and enqueues the batch.
        let effects = a
            .apply_account_input(AccountInput::SettlementAccept, &ctx(150, Some(&a_key)))
            .unwrap();
        let diffs = effects
            .iter()
            .find_map(|e| match e {
                AccountEffect::EnqueueSettlement { diffs } => Some(diffs.clone()),
                _ => None,
            })
            .unwrap();

        // Chain confirms: both sides apply the settled diffs identically.
        a.apply_settled(&diffs, &ctx(200, Some(&a_key))).unwrap();
        b.apply_settled(&diffs, &ctx(200, None)).unwrap();

        for m in [&a, &b] {
            let delta = m.deltas.get(&1).unwrap();
            assert_eq!(delta.collateral, I256::from(500));
            assert_eq!(delta.ondelta, I256::from(500));
        }
        assert_eq!(a.on_chain_settlement_nonce, 1);
    }
}
