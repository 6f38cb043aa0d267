use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use xln_core::constants::{MAX_MEMPOOL_BATCH, MEMPOOL_SIZE, PROPOSAL_TIMEOUT_MS};
use xln_core::{
    CommitNotice, ConsensusConfig, DilithiumPublicKey, EntityFrame, EntityId, EntityInput,
    EntityTx, Precommit, SignerId, Timestamp, XlnError,
};
use xln_crypto::{verify_signature, EncryptionKeyPair, KeyPair};

use crate::apply::{apply_entity_tx, post_frame_hooks, ApplyOutcome, EntityApplyCtx};
use crate::state::EntityState;

/// Per-call context for one replica. `signer_pubkeys` is the runtime's
/// signer directory used to verify precommits.
pub struct ReplicaCtx<'a> {
    pub now: Timestamp,
    pub keypair: Option<&'a KeyPair>,
    pub encryption: Option<&'a EncryptionKeyPair>,
    pub signer_pubkeys: &'a BTreeMap<SignerId, DilithiumPublicKey>,
    pub depository: String,
    pub require_sealed_onions: bool,
}

impl<'a> ReplicaCtx<'a> {
    fn apply_ctx(&self, now: Timestamp, with_signer: bool) -> EntityApplyCtx<'a> {
        EntityApplyCtx {
            now,
            depository: self.depository.clone(),
            signer: if with_signer { self.keypair } else { None },
            encryption: self.encryption,
            require_sealed_onions: self.require_sealed_onions,
        }
    }
}

/// The proposer's outstanding frame: tentative post-state and the outputs
/// produced while building it, forwarded verbatim on commit (never
/// re-executed, so proposer and replicators cannot diverge).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalState {
    pub frame: EntityFrame,
    pub new_state: EntityState,
    pub outputs: Vec<EntityInput>,
    pub gossip: Vec<xln_core::Profile>,
    pub sigs: BTreeMap<SignerId, xln_core::DilithiumSignature>,
    pub proposed_at: Timestamp,
}

/// A validator's locked view of the proposer's frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockedFrame {
    pub frame: EntityFrame,
    pub locked_at: Timestamp,
}

/// Everything a replica hands back to the runtime after one call.
#[derive(Debug, Default)]
pub struct ReplicaOutputs {
    pub outputs: Vec<EntityInput>,
    pub gossip: Vec<xln_core::Profile>,
}

impl ReplicaOutputs {
    fn merge(&mut self, other: ReplicaOutputs) {
        self.outputs.extend(other.outputs);
        self.gossip.extend(other.gossip);
    }
}

/// One signer's local view of an entity: replicated state plus the
/// consensus scaffolding around it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityReplica {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub state: EntityState,
    pub mempool: Vec<EntityTx>,
    pub proposal: Option<ProposalState>,
    pub locked_frame: Option<LockedFrame>,
    /// Index into `config.validators` of the current proposer.
    pub proposer_index: usize,
    /// Crontab bookkeeping: task name → last run, entity-local time.
    /// Replica-local, never part of the hashed state.
    pub cron_last_run: BTreeMap<String, Timestamp>,
}

impl EntityReplica {
    pub fn new(
        entity_id: EntityId,
        signer_id: impl Into<SignerId>,
        config: ConsensusConfig,
    ) -> Result<Self, XlnError> {
        config.validate()?;
        Ok(Self {
            entity_id,
            signer_id: signer_id.into(),
            state: EntityState::new(entity_id, config),
            mempool: Vec::new(),
            proposal: None,
            locked_frame: None,
            proposer_index: 0,
            cron_last_run: BTreeMap::new(),
        })
    }

    pub fn is_proposer(&self) -> bool {
        self.state
            .config
            .validators
            .get(self.proposer_index)
            .map(|p| *p == self.signer_id)
            .unwrap_or(false)
    }

    fn current_proposer(&self) -> SignerId {
        self.state.config.validators[self.proposer_index].clone()
    }

    fn other_validators(&self) -> Vec<SignerId> {
        self.state
            .config
            .validators
            .iter()
            .filter(|v| **v != self.signer_id)
            .cloned()
            .collect()
    }

    fn shares_of(&self, signer: &SignerId) -> u64 {
        self.state.config.shares.get(signer).copied().unwrap_or(0)
    }

    // ── Mempool ──────────────────────────────────────────────────────────────

    pub fn enqueue_tx(&mut self, tx: EntityTx) -> Result<(), XlnError> {
        if self.mempool.len() >= MEMPOOL_SIZE {
            return Err(XlnError::MempoolFull { size: MEMPOOL_SIZE });
        }
        self.mempool.push(tx);
        Ok(())
    }

    // ── Input processing ─────────────────────────────────────────────────────

    /// Feed one `EntityInput` through the replica; returns outputs for
    /// other replicas and entities.
    pub fn process_input(&mut self, input: EntityInput, ctx: &ReplicaCtx<'_>) -> ReplicaOutputs {
        let mut out = ReplicaOutputs::default();

        for tx in input.entity_txs {
            if let Err(err) = self.enqueue_tx(tx) {
                warn!(entity = %self.entity_id, signer = %self.signer_id, code = %err.code(), "tx rejected");
            }
        }

        if let Some(frame) = input.proposed_frame {
            out.merge(self.handle_proposed_frame(frame, ctx));
        }

        for precommit in input.precommits {
            out.merge(self.handle_precommit(precommit, ctx));
        }

        if let Some(notice) = input.commit_notice {
            out.merge(self.handle_commit_notice(notice, ctx));
        }

        out.merge(self.tick(ctx));
        out
    }

    /// Timeout checks plus the propose path; called once per runtime tick
    /// even when no input arrived.
    pub fn tick(&mut self, ctx: &ReplicaCtx<'_>) -> ReplicaOutputs {
        self.check_proposal_timeout(ctx.now);

        let mut out = ReplicaOutputs::default();
        if self.is_proposer() && self.proposal.is_none() && !self.mempool.is_empty() {
            out.merge(self.propose_frame(ctx));
        }
        out
    }

    // ── Proposer path ────────────────────────────────────────────────────────

    fn propose_frame(&mut self, ctx: &ReplicaCtx<'_>) -> ReplicaOutputs {
        let mut out = ReplicaOutputs::default();
        let batch: Vec<EntityTx> =
            self.mempool.iter().take(MAX_MEMPOOL_BATCH).cloned().collect();

        let mut tentative = self.state.clone();
        tentative.height = self.state.height + 1;
        tentative.timestamp = ctx.now;

        let apply_ctx = ctx.apply_ctx(ctx.now, true);
        let mut outcome = ApplyOutcome::default();
        for (i, tx) in batch.iter().enumerate() {
            if let Err(err) = apply_entity_tx(&mut tentative, tx, &apply_ctx, &mut outcome) {
                warn!(
                    entity = %self.entity_id,
                    tag = tx.tag(),
                    code = %err.code(),
                    "tx failed during frame build, dropping"
                );
                // Drop the offending tx; the rest stay queued behind it.
                self.mempool.remove(i);
                return out;
            }
        }
        post_frame_hooks(&mut tentative, &apply_ctx, &mut outcome);

        let frame = EntityFrame {
            height: tentative.height,
            timestamp: ctx.now,
            txs: batch,
            prev_hash: self.state.last_frame_hash,
            state_hash: tentative.hash(),
            hashes_to_sign: outcome.hashes_to_sign.clone(),
        };
        let frame_hash = frame.hash();

        let mut sigs = BTreeMap::new();
        if let Some(keypair) = ctx.keypair {
            sigs.insert(self.signer_id.clone(), keypair.sign(frame_hash.as_bytes()));
        }

        debug!(
            entity = %self.entity_id,
            height = frame.height,
            txs = frame.txs.len(),
            "proposing entity frame"
        );
        self.proposal = Some(ProposalState {
            frame: frame.clone(),
            new_state: tentative,
            outputs: outcome.outputs,
            gossip: outcome.gossip,
            sigs,
            proposed_at: ctx.now,
        });

        // Fast path: our own shares already clear the threshold.
        if self.collected_shares() >= self.state.config.threshold {
            out.merge(self.commit_proposal());
            return out;
        }

        for validator in self.other_validators() {
            out.outputs.push(EntityInput {
                entity_id: self.entity_id,
                signer_id: validator,
                proposed_frame: Some(frame.clone()),
                ..Default::default()
            });
        }
        out
    }

    fn collected_shares(&self) -> u64 {
        self.proposal
            .as_ref()
            .map(|p| p.sigs.keys().map(|s| self.shares_of(s)).sum())
            .unwrap_or(0)
    }

    fn handle_precommit(&mut self, precommit: Precommit, ctx: &ReplicaCtx<'_>) -> ReplicaOutputs {
        let Some(proposal) = self.proposal.as_mut() else {
            debug!(entity = %self.entity_id, "precommit without outstanding proposal, discarded");
            return ReplicaOutputs::default();
        };
        let frame_hash = proposal.frame.hash();
        if precommit.frame_hash != frame_hash {
            debug!(entity = %self.entity_id, "stale precommit discarded");
            return ReplicaOutputs::default();
        }
        if !self.state.config.shares.contains_key(&precommit.signer_id) {
            warn!(entity = %self.entity_id, signer = %precommit.signer_id, "precommit from non-validator");
            return ReplicaOutputs::default();
        }
        match ctx.signer_pubkeys.get(&precommit.signer_id) {
            Some(pubkey) => {
                if verify_signature(pubkey, frame_hash.as_bytes(), &precommit.signature).is_err() {
                    warn!(
                        entity = %self.entity_id,
                        signer = %precommit.signer_id,
                        code = "SIGNATURE_INVALID",
                        "precommit signature rejected"
                    );
                    return ReplicaOutputs::default();
                }
            }
            None => {
                warn!(entity = %self.entity_id, signer = %precommit.signer_id, "no public key on file");
                return ReplicaOutputs::default();
            }
        }

        // Idempotent on duplicates.
        proposal.sigs.insert(precommit.signer_id.clone(), precommit.signature);

        if self.collected_shares() >= self.state.config.threshold {
            self.commit_proposal()
        } else {
            ReplicaOutputs::default()
        }
    }

    /// Threshold reached: the tentative state becomes canonical and the
    /// stored outputs are released.
    fn commit_proposal(&mut self) -> ReplicaOutputs {
        let proposal = self.proposal.take().expect("commit without proposal");
        let frame_hash = proposal.frame.hash();
        let consumed = proposal.frame.txs.len();

        self.state = proposal.new_state;
        self.state.last_frame_hash = frame_hash;
        self.mempool.drain(..consumed.min(self.mempool.len()));

        info!(
            entity = %self.entity_id,
            signer = %self.signer_id,
            height = self.state.height,
            txs = consumed,
            "entity frame committed"
        );

        let mut out = ReplicaOutputs { outputs: proposal.outputs, gossip: proposal.gossip };
        let notice = CommitNotice { frame: proposal.frame, signatures: proposal.sigs };
        for validator in self.other_validators() {
            out.outputs.push(EntityInput {
                entity_id: self.entity_id,
                signer_id: validator,
                commit_notice: Some(notice.clone()),
                ..Default::default()
            });
        }
        out
    }

    // ── Validator path ───────────────────────────────────────────────────────

    fn handle_proposed_frame(
        &mut self,
        frame: EntityFrame,
        ctx: &ReplicaCtx<'_>,
    ) -> ReplicaOutputs {
        let mut out = ReplicaOutputs::default();
        if frame.height != self.state.height + 1 || frame.prev_hash != self.state.last_frame_hash {
            debug!(
                entity = %self.entity_id,
                height = frame.height,
                "proposed frame does not extend our head, dropped"
            );
            return out;
        }
        if let Some(locked) = &self.locked_frame {
            if locked.frame.hash() != frame.hash() {
                debug!(entity = %self.entity_id, "conflicting proposal while locked, dropped");
                return out;
            }
        }

        let frame_hash = frame.hash();
        self.locked_frame = Some(LockedFrame { frame, locked_at: ctx.now });

        if let Some(keypair) = ctx.keypair {
            out.outputs.push(EntityInput {
                entity_id: self.entity_id,
                signer_id: self.current_proposer(),
                precommits: vec![Precommit {
                    signer_id: self.signer_id.clone(),
                    frame_hash,
                    signature: keypair.sign(frame_hash.as_bytes()),
                }],
                ..Default::default()
            });
        }
        out
    }

    fn handle_commit_notice(&mut self, notice: CommitNotice, ctx: &ReplicaCtx<'_>) -> ReplicaOutputs {
        let out = ReplicaOutputs::default();
        let frame = notice.frame;
        if frame.height != self.state.height + 1 {
            debug!(entity = %self.entity_id, height = frame.height, "commit notice out of sequence");
            return out;
        }

        let frame_hash = frame.hash();
        let mut verified_shares = 0u64;
        for (signer, signature) in &notice.signatures {
            let Some(pubkey) = ctx.signer_pubkeys.get(signer) else { continue };
            if verify_signature(pubkey, frame_hash.as_bytes(), signature).is_ok() {
                verified_shares += self.shares_of(signer);
            }
        }
        if verified_shares < self.state.config.threshold {
            warn!(
                entity = %self.entity_id,
                collected = verified_shares,
                threshold = self.state.config.threshold,
                code = "THRESHOLD_NOT_MET",
                "commit notice rejected"
            );
            return out;
        }

        // Replay the frame deterministically; outputs were already emitted
        // by the proposer and are discarded here.
        let mut tentative = self.state.clone();
        tentative.height = frame.height;
        tentative.timestamp = frame.timestamp;
        let apply_ctx = ctx.apply_ctx(frame.timestamp, false);
        let mut discard = ApplyOutcome::default();
        for tx in &frame.txs {
            if let Err(err) = apply_entity_tx(&mut tentative, tx, &apply_ctx, &mut discard) {
                warn!(
                    entity = %self.entity_id,
                    tag = tx.tag(),
                    code = %err.code(),
                    "tx failed during commit replay"
                );
            }
        }
        post_frame_hooks(&mut tentative, &apply_ctx, &mut discard);

        self.state = tentative;
        self.state.last_frame_hash = frame_hash;
        self.locked_frame = None;

        // Clear any of the committed txs from our own queue.
        self.mempool.retain(|tx| !frame.txs.contains(tx));

        info!(
            entity = %self.entity_id,
            signer = %self.signer_id,
            height = self.state.height,
            "entity frame adopted from commit notice"
        );
        out
    }

    // ── Liveness ─────────────────────────────────────────────────────────────

    /// The only dynamic liveness path: on `PROPOSAL_TIMEOUT_MS` without a
    /// commit, demote the proposer and rotate round-robin.
    fn check_proposal_timeout(&mut self, now: Timestamp) {
        let timed_out = match (&self.proposal, &self.locked_frame) {
            (Some(p), _) => now.saturating_sub(p.proposed_at) >= PROPOSAL_TIMEOUT_MS,
            (_, Some(l)) => now.saturating_sub(l.locked_at) >= PROPOSAL_TIMEOUT_MS,
            _ => false,
        };
        if !timed_out {
            return;
        }
        let height = self.state.height + 1;
        warn!(
            entity = %self.entity_id,
            signer = %self.signer_id,
            height,
            code = "PROPOSAL_TIMEOUT",
            "rotating proposer"
        );
        self.proposal = None;
        self.locked_frame = None;
        self.proposer_index = (self.proposer_index + 1) % self.state.config.validators.len();
    }
}
