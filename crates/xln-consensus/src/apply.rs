use ethnum::{I256, U256};
use tracing::{debug, info, warn};

use xln_core::constants::MAX_HOPS;
use xln_core::{
    derive_lock_id, AccountInput, AccountTx, BatchR2r, BatchSettlement, EntityId, EntityInput,
    EntityTx, Hash32, HtlcLock, JEvent, Profile, ProposalAction, Secret, Timestamp, VoteChoice,
    XlnError,
};
use xln_account::{hop_reveal_height, hop_timelock, AccountCtx, AccountEffect, AccountMachine};
use xln_crypto::{EncryptionKeyPair, KeyPair};

use crate::state::{DebtRecord, EntityState, HtlcRoute, Proposal};

/// Context for applying one entity frame. `signer` is the replica's keypair
/// and is used only for output construction (account ACK hankos); state
/// transitions never depend on it.
pub struct EntityApplyCtx<'a> {
    pub now: Timestamp,
    pub depository: String,
    pub signer: Option<&'a KeyPair>,
    pub encryption: Option<&'a EncryptionKeyPair>,
    pub require_sealed_onions: bool,
}

impl EntityApplyCtx<'_> {
    fn account_ctx(&self, state: &EntityState) -> AccountCtx<'_> {
        AccountCtx {
            now: self.now,
            j_height: state.last_finalized_j_height,
            depository: self.depository.clone(),
            signer: self.signer,
            encryption: self.encryption,
            require_sealed_onions: self.require_sealed_onions,
        }
    }
}

/// Everything one frame application wants the outer layer to do.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Inputs for other entities. `signer_id` is left empty and resolved to
    /// the destination's proposer at dispatch time.
    pub outputs: Vec<EntityInput>,
    /// Account proof-body hashes produced while applying; co-signed by the
    /// quorum alongside the frame hash.
    pub hashes_to_sign: Vec<Hash32>,
    /// Profiles to announce through gossip.
    pub gossip: Vec<Profile>,
}

impl ApplyOutcome {
    fn send_account_input(&mut self, me: EntityId, peer: EntityId, input: AccountInput) {
        self.outputs.push(EntityInput::txs(
            peer,
            "",
            vec![EntityTx::AccountInput { peer: me, input }],
        ));
    }
}

/// Apply one entity transaction. Runs identically on the proposer (frame
/// build) and every validator (commit replay); all branching is a pure
/// function of `state`, `tx`, and the frame-fixed parts of `ctx`.
pub fn apply_entity_tx(
    state: &mut EntityState,
    tx: &EntityTx,
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) -> Result<(), XlnError> {
    match tx {
        EntityTx::Chat { from, message } => {
            *state.nonces.entry(from.clone()).or_insert(0) += 1;
            state.log_message(format!("{from}: {message}"));
            Ok(())
        }

        EntityTx::OpenAccount { peer } => apply_open_account(state, *peer, ctx, outcome),

        EntityTx::AccountInput { peer, input } => {
            apply_account_input(state, *peer, input.clone(), ctx, outcome)
        }

        EntityTx::DirectPayment { peer, token_id, amount } => {
            let me = state.entity_id;
            let machine = state
                .accounts
                .get_mut(peer)
                .ok_or(XlnError::InvalidRoute { detail: format!("no account with {peer}") })?;
            machine.add_account_tx(AccountTx::DirectPayment {
                token_id: *token_id,
                amount: *amount,
                sender_is_left: me == machine.left_entity,
            })
        }

        EntityTx::AccountTx { peer, tx } => {
            let machine = state
                .accounts
                .get_mut(peer)
                .ok_or(XlnError::InvalidRoute { detail: format!("no account with {peer}") })?;
            machine.add_account_tx(tx.clone())
        }

        EntityTx::ProposeSettlement { peer, ops } => {
            let machine = state
                .accounts
                .get_mut(peer)
                .ok_or(XlnError::InvalidRoute { detail: format!("no account with {peer}") })?;
            let effects = machine.propose_settlement(ops.clone(), ctx.now)?;
            process_account_effects(state, *peer, effects, ctx, outcome);
            Ok(())
        }

        EntityTx::HtlcPayment { first_hop, token_id, amount, hashlock, num_hops, envelope } => {
            apply_htlc_payment(
                state, *first_hop, *token_id, *amount, *hashlock, *num_hops,
                envelope.clone(), ctx,
            )
        }

        EntityTx::Propose { proposer, action } => {
            let id_value = serde_json::json!({
                "proposer": proposer,
                "action": xln_codec::encode_tagged(action).map_err(|e| XlnError::Codec(e.to_string()))?,
                "height": state.height,
                "timestamp": ctx.now,
            });
            let id = Hash32::from_bytes(xln_codec::keccak_value(&id_value));
            let mut proposal = Proposal {
                id,
                proposer: proposer.clone(),
                action: action.clone(),
                votes: std::collections::BTreeMap::new(),
                created_at: ctx.now,
            };
            proposal.votes.insert(proposer.clone(), VoteChoice::Yes);
            if proposal.yes_shares(&state.config) >= state.config.threshold {
                execute_proposal(state, &proposal);
            } else {
                state.proposals.insert(id, proposal);
            }
            Ok(())
        }

        EntityTx::Vote { voter, proposal_id, choice } => {
            let Some(proposal) = state.proposals.get_mut(proposal_id) else {
                return Err(XlnError::UnknownProposal { id: proposal_id.to_hex() });
            };
            proposal.votes.insert(voter.clone(), *choice);
            let passed = proposal.yes_shares(&state.config) >= state.config.threshold;
            if passed {
                let proposal = state.proposals.remove(proposal_id).expect("present above");
                execute_proposal(state, &proposal);
            }
            Ok(())
        }

        EntityTx::ReserveTransfer { to, token_id, amount } => {
            if state.reserve(*token_id) < *amount {
                return Err(XlnError::FinancialSafety {
                    check: "INSUFFICIENT_RESERVE",
                    detail: format!("transfer {amount} > reserve {}", state.reserve(*token_id)),
                });
            }
            if !state.j_batch.has_r2r_room() {
                return Err(XlnError::AccountQuota {
                    detail: "outbound batch r2r section full".to_string(),
                });
            }
            state.j_batch.r2r.push(BatchR2r { to: *to, token_id: *token_id, amount: *amount });
            Ok(())
        }

        EntityTx::JEvent { block_number, block_hash, events } => {
            apply_j_block(state, *block_number, *block_hash, events, ctx, outcome)
        }

        EntityTx::BatchFlushed { settlements, r2r, tx_hash } => {
            let drain_s = (*settlements).min(state.j_batch.settlements.len());
            let drain_r = (*r2r).min(state.j_batch.r2r.len());
            state.j_batch.settlements.drain(..drain_s);
            state.j_batch.r2r.drain(..drain_r);
            state.j_batch.last_broadcast_at = ctx.now;
            state.log_message(format!("BATCH_BROADCAST: {tx_hash}"));
            Ok(())
        }

        EntityTx::SetProfile { profile } => {
            if profile.entity_id != state.entity_id {
                return Err(XlnError::InvalidEntityId { input: profile.entity_id.to_hex() });
            }
            state.profile = Some(profile.clone());
            outcome.gossip.push(profile.clone());
            Ok(())
        }
    }
}

fn execute_proposal(state: &mut EntityState, proposal: &Proposal) {
    match &proposal.action {
        ProposalAction::CollectiveMessage { message } => {
            info!(entity = %state.entity_id, "governance proposal passed");
            state.log_message(format!("[collective] {message}"));
        }
    }
}

fn apply_open_account(
    state: &mut EntityState,
    peer: EntityId,
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) -> Result<(), XlnError> {
    let me = state.entity_id;
    if peer == me {
        return Err(XlnError::InvalidRoute { detail: "cannot open account with self".to_string() });
    }
    if state.accounts.contains_key(&peer) {
        return Ok(());
    }
    let machine = AccountMachine::open(me, peer, &ctx.depository);
    debug!(entity = %me, %peer, "account opened");
    state.log_message(format!("accountOpened: {peer}"));
    state.accounts.insert(peer, machine);
    // The peer mirrors the machine on its side; idempotent if it already has
    // one.
    outcome.outputs.push(EntityInput::txs(peer, "", vec![EntityTx::OpenAccount { peer: me }]));
    Ok(())
}

fn apply_account_input(
    state: &mut EntityState,
    peer: EntityId,
    input: AccountInput,
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) -> Result<(), XlnError> {
    let me = state.entity_id;
    if !state.accounts.contains_key(&peer) {
        // First contact through an incoming frame auto-opens the account.
        state
            .accounts
            .insert(peer, AccountMachine::open(me, peer, &ctx.depository));
        state.log_message(format!("accountOpened: {peer}"));
    }

    let acct_ctx = ctx.account_ctx(state);
    let machine = state.accounts.get_mut(&peer).expect("inserted above");
    let effects = match machine.apply_account_input(input, &acct_ctx) {
        Ok(effects) => effects,
        Err(err) if err.is_droppable() => {
            warn!(entity = %me, %peer, code = %err.code(), "account input dropped");
            return Ok(());
        }
        Err(err) => {
            // Conservation / proof-body failures already flipped the
            // account to Disputed; the frame still commits so every
            // replica records the transition. The crontab sweep surfaces
            // the dispute suggestion.
            tracing::error!(entity = %me, %peer, code = %err.code(), "account suspended");
            return Ok(());
        }
    };
    let proof_hash = machine.proof_body_hash;
    outcome.hashes_to_sign.push(proof_hash);

    process_account_effects(state, peer, effects, ctx, outcome);
    Ok(())
}

fn apply_htlc_payment(
    state: &mut EntityState,
    first_hop: EntityId,
    token_id: u32,
    amount: I256,
    hashlock: Hash32,
    num_hops: usize,
    envelope: xln_core::OnionEnvelope,
    ctx: &EntityApplyCtx<'_>,
) -> Result<(), XlnError> {
    if num_hops < 2 || num_hops > MAX_HOPS {
        return Err(XlnError::MaxHopsExceeded { hops: num_hops, max: MAX_HOPS });
    }
    let me = state.entity_id;
    let j_height = state.last_finalized_j_height;
    let machine = state
        .accounts
        .get_mut(&first_hop)
        .ok_or(XlnError::InvalidRoute { detail: format!("no account with {first_hop}") })?;

    let lock = HtlcLock {
        lock_id: derive_lock_id(&hashlock, token_id, &amount, ctx.now),
        token_id,
        amount,
        hashlock,
        reveal_before_height: hop_reveal_height(j_height, num_hops, 0),
        timelock: hop_timelock(ctx.now + num_hops as u64 * xln_core::MIN_TIMELOCK_DELTA_MS, 0),
        sender_is_left: me == machine.left_entity,
        inner_envelope: envelope,
        created_at: ctx.now,
    };
    let lock_id = lock.lock_id;
    machine.add_account_tx(AccountTx::CreateLock { lock })?;

    state.htlc_routes.insert(
        hashlock,
        HtlcRoute { inbound: None, outbound: Some((first_hop, lock_id)), resolved_secret: None },
    );
    Ok(())
}

/// Translate account effects into entity-level bookkeeping and outputs.
fn process_account_effects(
    state: &mut EntityState,
    peer: EntityId,
    effects: Vec<AccountEffect>,
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) {
    let me = state.entity_id;
    for effect in effects {
        match effect {
            AccountEffect::SendToPeer(input) => {
                outcome.send_account_input(me, peer, input);
            }

            AccountEffect::ForwardHtlc {
                next_hop,
                inbound_lock_id,
                token_id,
                amount,
                hashlock,
                reveal_before_height,
                timelock,
                envelope,
            } => {
                let Some(next_machine) = state.accounts.get_mut(&next_hop) else {
                    warn!(entity = %me, %next_hop, "no account toward next hop, bouncing");
                    outcome.send_account_input(
                        me,
                        peer,
                        AccountInput::HtlcCancel {
                            lock_id: inbound_lock_id,
                            reason: "no route to next hop".to_string(),
                        },
                    );
                    continue;
                };
                let lock = HtlcLock {
                    lock_id: derive_lock_id(&hashlock, token_id, &amount, ctx.now),
                    token_id,
                    amount,
                    hashlock,
                    reveal_before_height,
                    timelock,
                    sender_is_left: me == next_machine.left_entity,
                    inner_envelope: envelope,
                    created_at: ctx.now,
                };
                let outbound_lock_id = lock.lock_id;
                if let Err(err) = next_machine.add_account_tx(AccountTx::CreateLock { lock }) {
                    warn!(entity = %me, %next_hop, code = %err.code(), "forward failed, bouncing");
                    outcome.send_account_input(
                        me,
                        peer,
                        AccountInput::HtlcCancel {
                            lock_id: inbound_lock_id,
                            reason: err.code(),
                        },
                    );
                    continue;
                }
                state.htlc_routes.insert(
                    hashlock,
                    HtlcRoute {
                        inbound: Some((peer, inbound_lock_id)),
                        outbound: Some((next_hop, outbound_lock_id)),
                        resolved_secret: None,
                    },
                );
            }

            AccountEffect::SecretLearned { hashlock, secret } => {
                resolve_secret(state, hashlock, secret, outcome);
            }

            AccountEffect::PaymentReceived { token_id, amount } => {
                state.log_message(format!("paymentReceived: {amount} of token {token_id} via {peer}"));
            }

            AccountEffect::EnqueueSettlement { diffs } => {
                if state.j_batch.has_settlement_room() {
                    state.j_batch.settlements.push(BatchSettlement { counterparty: peer, diffs });
                } else {
                    warn!(entity = %me, "settlement batch full, deferring");
                    state.log_message("BATCH_FULL: settlement deferred".to_string());
                }
            }
        }
    }
}

/// Propagate a learned preimage upstream and mark the route resolved.
fn resolve_secret(
    state: &mut EntityState,
    hashlock: Hash32,
    secret: Secret,
    outcome: &mut ApplyOutcome,
) {
    let me = state.entity_id;
    let upstream = match state.htlc_routes.get_mut(&hashlock) {
        Some(route) => {
            if route.resolved_secret.is_some() {
                return;
            }
            route.resolved_secret = Some(secret);
            Some(route.inbound)
        }
        None => None,
    };
    match upstream {
        Some(Some((upstream_peer, upstream_lock))) => {
            outcome.send_account_input(
                me,
                upstream_peer,
                AccountInput::HtlcSettle { lock_id: upstream_lock, secret },
            );
        }
        // We originated this payment; the round trip is complete.
        Some(None) => state.log_message(format!("paymentResolved: {hashlock}")),
        None => state.log_message(format!("secretObserved: {hashlock}")),
    }
}

/// Apply one jurisdiction block's events. Exactly-once per replica, keyed
/// by `last_finalized_j_height`; duplicates are idempotent.
fn apply_j_block(
    state: &mut EntityState,
    block_number: u64,
    block_hash: Hash32,
    events: &[JEvent],
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) -> Result<(), XlnError> {
    if block_number <= state.last_finalized_j_height {
        debug!(entity = %state.entity_id, block_number, "duplicate j-block ignored");
        return Ok(());
    }
    state.j_block_observations.insert(block_number, block_hash);
    state.last_finalized_j_height = block_number;

    let me = state.entity_id;
    for event in events {
        if !event.concerns(&me) {
            continue;
        }
        match event {
            JEvent::ReserveUpdated { token_id, new_balance, .. } => {
                state.reserves.insert(*token_id, *new_balance);
            }

            JEvent::SecretRevealed { secret, hashlock } => {
                // Settle any lock we received under this hashlock.
                let mut reveals: Vec<(EntityId, xln_core::LockId)> = Vec::new();
                for (peer, machine) in &state.accounts {
                    for lock in machine.locks.values() {
                        let owner_is_receiver =
                            lock.sender_is_left != machine.owner_is_left;
                        if lock.hashlock == *hashlock && owner_is_receiver {
                            reveals.push((*peer, lock.lock_id));
                        }
                    }
                }
                for (peer, lock_id) in reveals {
                    outcome.send_account_input(
                        me,
                        peer,
                        AccountInput::HtlcSettle { lock_id, secret: *secret },
                    );
                }
                resolve_secret(state, *hashlock, *secret, outcome);
            }

            JEvent::AccountSettled { left, right, diffs } => {
                let peer = if *left == me { *right } else { *left };
                let my_diff_is_left = *left == me;
                for diff in diffs {
                    let my_diff = if my_diff_is_left { diff.left_diff } else { diff.right_diff };
                    apply_reserve_diff(state, diff.token_id, my_diff);
                }
                let acct_ctx = ctx.account_ctx(state);
                if let Some(machine) = state.accounts.get_mut(&peer) {
                    let effects = machine.apply_settled(diffs, &acct_ctx)?;
                    process_account_effects(state, peer, effects, ctx, outcome);
                }
            }

            JEvent::DisputeStarted { sender, counter, nonce } => {
                let peer = if *sender == me { *counter } else { *sender };
                if let Some(machine) = state.accounts.get_mut(&peer) {
                    machine.mark_disputed(*nonce, ctx.now);
                }
                state.log_message(format!("disputeStarted: {peer} nonce {nonce}"));
            }

            JEvent::DisputeFinalized { sender, counter, nonce } => {
                let peer = if *sender == me { *counter } else { *sender };
                if let Some(machine) = state.accounts.get_mut(&peer) {
                    machine.active_dispute = None;
                    machine.status = xln_account::AccountStatus::Active;
                }
                state.log_message(format!("disputeFinalized: {peer} nonce {nonce}"));
            }

            JEvent::DebtCreated { debtor, creditor, token_id, amount } => {
                let we_are_debtor = *debtor == me;
                let counterparty = if we_are_debtor { *creditor } else { *debtor };
                state.debts.push(DebtRecord {
                    counterparty,
                    token_id: *token_id,
                    amount: *amount,
                    we_are_debtor,
                });
            }
        }
    }
    Ok(())
}

fn apply_reserve_diff(state: &mut EntityState, token_id: u32, diff: I256) {
    let current = state.reserve(token_id);
    let next = if diff >= I256::ZERO {
        current + i256_to_u256(diff)
    } else {
        let take = i256_to_u256(-diff);
        if take > current {
            warn!(entity = %state.entity_id, token_id, "settlement overdraws reserve, clamping");
            U256::ZERO
        } else {
            current - take
        }
    };
    state.reserves.insert(token_id, next);
}

fn i256_to_u256(v: I256) -> U256 {
    debug_assert!(v >= I256::ZERO);
    U256::from_str_radix(&v.to_string(), 10).unwrap_or(U256::ZERO)
}

/// Post-frame hooks, run after all txs of a frame: sweep expired locks and
/// flush account mempools into new bilateral proposals.
pub fn post_frame_hooks(
    state: &mut EntityState,
    ctx: &EntityApplyCtx<'_>,
    outcome: &mut ApplyOutcome,
) {
    let me = state.entity_id;
    let peers: Vec<EntityId> = state.accounts.keys().copied().collect();
    for peer in peers {
        let acct_ctx = ctx.account_ctx(state);
        let machine = state.accounts.get_mut(&peer).expect("key just listed");
        let swept = machine.sweep_expired_locks(acct_ctx.j_height);
        if swept > 0 {
            debug!(entity = %me, %peer, swept, "expired locks queued for cancellation");
        }
        match machine.try_propose_frame(&acct_ctx) {
            Ok(Some(AccountEffect::SendToPeer(input))) => {
                outcome.send_account_input(me, peer, input);
                outcome.hashes_to_sign.push(machine.proof_body_hash);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(entity = %me, %peer, code = %err.code(), "account proposal failed");
            }
        }
    }
}
