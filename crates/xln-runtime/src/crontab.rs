use tracing::{debug, info};

use xln_core::constants::{
    ACCOUNT_ACK_TIMEOUT_MS, ACCOUNT_TIMEOUT_MS, CRON_ACCOUNT_TIMEOUT_INTERVAL_MS,
    CRON_BATCH_INTERVAL_MS, CRON_REBALANCE_INTERVAL_MS, MAX_R2R_PER_BATCH,
    MAX_SETTLEMENTS_PER_BATCH,
};
use xln_core::{EntityId, EntityInput, EntityTx, Hash32, Timestamp, TokenId};
use xln_jwatch::JBatchTx;

use crate::env::Env;

/// What one crontab sweep produced: self/peer-directed entity inputs and
/// outbound jurisdiction batches. Handlers never mutate entity state
/// directly; every state change rides a transaction through consensus.
#[derive(Debug, Default)]
pub struct CronOutcome {
    pub entity_inputs: Vec<EntityInput>,
    pub j_batches: Vec<JBatchTx>,
}

struct Task {
    name: &'static str,
    interval_ms: u64,
    run: fn(&mut Ctx<'_>),
}

const TASKS: [Task; 3] = [
    Task {
        name: "check_account_timeouts",
        interval_ms: CRON_ACCOUNT_TIMEOUT_INTERVAL_MS,
        run: check_account_timeouts,
    },
    Task { name: "broadcast_batch", interval_ms: CRON_BATCH_INTERVAL_MS, run: broadcast_batch },
    Task { name: "hub_rebalance", interval_ms: CRON_REBALANCE_INTERVAL_MS, run: hub_rebalance },
];

struct Ctx<'a> {
    replica: &'a xln_consensus::EntityReplica,
    now: Timestamp,
    outcome: &'a mut CronOutcome,
}

impl Ctx<'_> {
    fn entity(&self) -> EntityId {
        self.replica.entity_id
    }

    fn self_txs(&mut self, txs: Vec<EntityTx>) {
        let input =
            EntityInput::txs(self.entity(), self.replica.signer_id.clone(), txs);
        self.outcome.entity_inputs.push(input);
    }
}

/// Run every due task for one replica. Proposer replicas only; the
/// emitted inputs feed back through consensus, so running them on every
/// replica would duplicate work.
///
/// `now` is the entity's own `state.timestamp`, never wall time.
pub fn run(env: &mut Env, key: &str) -> CronOutcome {
    let mut outcome = CronOutcome::default();
    let Some(replica) = env.replicas.get_mut(key) else { return outcome };
    if !replica.is_proposer() {
        return outcome;
    }
    let now = replica.state.timestamp;

    for task in &TASKS {
        let last = replica.cron_last_run.get(task.name).copied().unwrap_or(0);
        if now.saturating_sub(last) < task.interval_ms {
            continue;
        }
        replica.cron_last_run.insert(task.name.to_string(), now);
        debug!(entity = %replica.entity_id, task = task.name, "crontab task firing");
        let mut ctx = Ctx { replica, now, outcome: &mut outcome };
        (task.run)(&mut ctx);
    }
    outcome
}

/// Emit a dispute-suggestion chat event for every account whose pending
/// frame has outlived `ACCOUNT_TIMEOUT_MS`, and re-send proposals the peer
/// has not acknowledged within `ACCOUNT_ACK_TIMEOUT_MS`. Advisory only:
/// nothing here starts a dispute.
fn check_account_timeouts(ctx: &mut Ctx<'_>) {
    let me = ctx.entity();
    let mut chat = Vec::new();
    for (peer, machine) in &ctx.replica.state.accounts {
        let Some(pending) = &machine.pending_frame else { continue };
        let age = pending.age(ctx.now);
        if age > ACCOUNT_TIMEOUT_MS {
            info!(entity = %me, %peer, age, "account frame unacknowledged, suggesting dispute");
            chat.push(EntityTx::Chat {
                from: ctx.replica.signer_id.clone(),
                message: format!(
                    "DISPUTE_SUGGESTION: account {peer} stuck at height {} for {age}ms",
                    pending.frame.height
                ),
            });
        } else if age >= ACCOUNT_ACK_TIMEOUT_MS {
            if let Some(input) = machine.resend_pending(ctx.now) {
                ctx.outcome.entity_inputs.push(EntityInput::txs(
                    *peer,
                    "",
                    vec![EntityTx::AccountInput { peer: me, input }],
                ));
            }
        }
    }
    if !chat.is_empty() {
        ctx.self_txs(chat);
    }
}

/// Flush the outbound jurisdiction batch when non-empty and the cadence
/// has passed. The matching `BatchFlushed` tx drains the broadcast slice
/// through consensus; a failed broadcast simply re-evaluates next sweep.
fn broadcast_batch(ctx: &mut Ctx<'_>) {
    let batch_state = &ctx.replica.state.j_batch;
    if !batch_state.should_broadcast(ctx.now) {
        return;
    }
    let settlements: Vec<_> = batch_state
        .settlements
        .iter()
        .take(MAX_SETTLEMENTS_PER_BATCH)
        .cloned()
        .collect();
    let r2r: Vec<_> = batch_state.r2r.iter().take(MAX_R2R_PER_BATCH).cloned().collect();

    let batch = JBatchTx { from: ctx.entity(), settlements, r2r };
    let value = serde_json::to_value(&batch).expect("batch encoding is infallible");
    let tx_hash = Hash32::from_bytes(xln_codec::keccak_value(&value)).to_hex();

    info!(entity = %ctx.entity(), %tx_hash, "broadcasting jurisdiction batch");
    let flushed = EntityTx::BatchFlushed {
        settlements: batch.settlements.len(),
        r2r: batch.r2r.len(),
        tx_hash,
    };
    ctx.outcome.j_batches.push(batch);
    ctx.self_txs(vec![flushed]);
}

/// Match net-spender accounts against net-receiver accounts per token and
/// surface the pairing as a `REBALANCE_OPPORTUNITY` event for the operator.
fn hub_rebalance(ctx: &mut Ctx<'_>) {
    let mut tokens: Vec<TokenId> = Vec::new();
    for machine in ctx.replica.state.accounts.values() {
        for token_id in machine.deltas.keys() {
            if !tokens.contains(token_id) {
                tokens.push(*token_id);
            }
        }
    }

    let mut chat = Vec::new();
    for token_id in tokens {
        let mut spenders: Vec<EntityId> = Vec::new();
        let mut receivers: Vec<EntityId> = Vec::new();
        for (peer, machine) in &ctx.replica.state.accounts {
            let outflow = machine.net_outflow(token_id);
            if outflow > ethnum::I256::ZERO {
                spenders.push(*peer);
            } else if outflow < ethnum::I256::ZERO {
                receivers.push(*peer);
            }
        }
        if !spenders.is_empty() && !receivers.is_empty() {
            chat.push(EntityTx::Chat {
                from: ctx.replica.signer_id.clone(),
                message: format!(
                    "REBALANCE_OPPORTUNITY: token {token_id} spenders {spenders:?} receivers {receivers:?}"
                ),
            });
        }
    }
    if !chat.is_empty() {
        ctx.self_txs(chat);
    }
}
