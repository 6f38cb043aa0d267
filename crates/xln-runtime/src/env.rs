use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use xln_core::{
    ConsensusConfig, DilithiumPublicKey, EntityId, EntityInput, Hash32, Profile, RuntimeConfig,
    SignerId, Timestamp, XlnError,
};
use xln_consensus::{EntityReplica, ReplicaCtx};
use xln_crypto::{EncryptionKeyPair, KeyPair};
use xln_gossip::GossipStore;
use xln_jwatch::JBatchTx;

use crate::crontab;

/// Guard against routing loops inside one tick.
const MAX_CASCADE_STEPS: usize = 10_000;

/// The single owning container for everything the deterministic tick
/// touches: replicas keyed by `(entity, signer)`, the signer directory,
/// entity encryption keys, and the gossip store. No statics anywhere;
/// callers may not retain references across ticks.
#[derive(Serialize, Deserialize)]
pub struct Env {
    pub height: u64,
    pub timestamp: Timestamp,
    pub runtime_seed: Hash32,
    pub config: RuntimeConfig,
    /// Keyed by [`replica_key`] (`<entity-hex>:<signer>`).
    pub replicas: BTreeMap<String, EntityReplica>,
    /// Local signing keys. Remote validators appear only in
    /// `signer_pubkeys`.
    pub signers: BTreeMap<SignerId, KeyPair>,
    pub signer_pubkeys: BTreeMap<SignerId, DilithiumPublicKey>,
    /// Per-entity onion decryption keys, shared by all local replicas of
    /// the entity.
    pub encryption: BTreeMap<EntityId, EncryptionKeyPair>,
    pub gossip: GossipStore,
}

pub fn replica_key(entity: &EntityId, signer: &SignerId) -> String {
    format!("{}:{signer}", entity.to_hex())
}

/// Admin-level transactions, processed before entity inputs each tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeTx {
    ImportReplica {
        entity_id: EntityId,
        signer_id: SignerId,
        config: ConsensusConfig,
    },
}

/// One tick's worth of external input. All non-determinism is in here:
/// the caller supplies time; randomness derives from `env.runtime_seed`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeInput {
    pub now: Timestamp,
    #[serde(default)]
    pub runtime_txs: Vec<RuntimeTx>,
    #[serde(default)]
    pub entity_inputs: Vec<EntityInput>,
}

/// What one tick emits: inputs for replicas on other runtimes, outbound
/// jurisdiction batches, and gossip announcements.
#[derive(Debug, Default)]
pub struct StepOutputs {
    pub entity_outbox: Vec<EntityInput>,
    pub j_batches: Vec<JBatchTx>,
    pub gossip: Vec<Profile>,
}

impl Env {
    pub fn new(config: RuntimeConfig, runtime_seed: Hash32) -> Self {
        Self {
            height: 0,
            timestamp: 0,
            runtime_seed,
            config,
            replicas: BTreeMap::new(),
            signers: BTreeMap::new(),
            signer_pubkeys: BTreeMap::new(),
            encryption: BTreeMap::new(),
            gossip: GossipStore::new(),
        }
    }

    /// Register a local signing key (node boot / test setup only).
    pub fn register_signer(&mut self, signer_id: impl Into<SignerId>, keypair: KeyPair) {
        let signer_id = signer_id.into();
        self.signer_pubkeys.insert(signer_id.clone(), keypair.public_key.clone());
        self.signers.insert(signer_id, keypair);
    }

    /// Register a remote validator's public key.
    pub fn register_pubkey(&mut self, signer_id: impl Into<SignerId>, pubkey: DilithiumPublicKey) {
        self.signer_pubkeys.insert(signer_id.into(), pubkey);
    }

    pub fn register_encryption(&mut self, entity: EntityId, keys: EncryptionKeyPair) {
        self.encryption.insert(entity, keys);
    }

    pub fn replica(&self, entity: &EntityId, signer: &SignerId) -> Option<&EntityReplica> {
        self.replicas.get(&replica_key(entity, signer))
    }

    /// All local entity ids, deduplicated.
    pub fn local_entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self.replicas.values().map(|r| r.entity_id).collect();
        entities.sort();
        entities.dedup();
        entities
    }

    fn import_replica(
        &mut self,
        entity_id: EntityId,
        signer_id: SignerId,
        config: ConsensusConfig,
    ) -> Result<(), XlnError> {
        let key = replica_key(&entity_id, &signer_id);
        if self.replicas.contains_key(&key) {
            debug!(entity = %entity_id, signer = %signer_id, "replica already imported");
            return Ok(());
        }
        let replica = EntityReplica::new(entity_id, signer_id.clone(), config)?;
        debug!(entity = %entity_id, signer = %signer_id, "replica imported");
        self.replicas.insert(key, replica);
        Ok(())
    }

    /// Resolve an input to a local replica key, or `None` when it must
    /// leave through the relay. Inputs with an empty `signer_id` go to the
    /// destination entity's current proposer.
    fn resolve_destination(&self, input: &mut EntityInput) -> Option<String> {
        if !input.signer_id.is_empty() {
            let key = replica_key(&input.entity_id, &input.signer_id);
            return self.replicas.contains_key(&key).then_some(key);
        }
        // Proposer resolution from any local replica of the entity.
        let local = self.replicas.values().find(|r| r.entity_id == input.entity_id)?;
        let proposer = local.state.config.validators
            [local.proposer_index.min(local.state.config.validators.len() - 1)]
        .clone();
        input.signer_id = proposer.clone();
        let key = replica_key(&input.entity_id, &proposer);
        self.replicas.contains_key(&key).then_some(key)
    }
}

/// The deterministic tick: `step(env, input) → (env', outputs)`.
///
/// Ordering within a tick: runtime txs, then entity inputs (cascading
/// through local replicas until quiescent), then per-replica timeout /
/// propose ticks, then crontab. Outputs for non-local replicas accumulate
/// in the outbox and are emitted once at the end.
pub fn step(env: &mut Env, input: RuntimeInput) -> StepOutputs {
    env.timestamp = env.timestamp.max(input.now);
    env.height += 1;

    let mut outputs = StepOutputs::default();

    for tx in input.runtime_txs {
        match tx {
            RuntimeTx::ImportReplica { entity_id, signer_id, config } => {
                if let Err(err) = env.import_replica(entity_id, signer_id, config) {
                    warn!(code = %err.code(), "replica import failed");
                }
            }
        }
    }

    let mut queue: VecDeque<EntityInput> = input.entity_inputs.into();
    cascade(env, &mut queue, &mut outputs);

    // Replicas that saw no input still get their timeout / propose tick.
    let keys: Vec<String> = env.replicas.keys().cloned().collect();
    for key in &keys {
        let out = with_replica(env, key, |replica, ctx| replica.tick(ctx));
        absorb(env, out, &mut queue, &mut outputs);
    }
    cascade(env, &mut queue, &mut outputs);

    // Deterministic periodic tasks, proposer replicas only.
    for key in &keys {
        let cron = crontab::run(env, key);
        queue.extend(cron.entity_inputs);
        outputs.j_batches.extend(cron.j_batches);
    }
    cascade(env, &mut queue, &mut outputs);

    outputs
}

/// Deliver queued inputs to local replicas until the queue drains; inputs
/// for remote replicas land in the outbox.
fn cascade(env: &mut Env, queue: &mut VecDeque<EntityInput>, outputs: &mut StepOutputs) {
    let mut steps = 0;
    while let Some(mut input) = queue.pop_front() {
        steps += 1;
        if steps > MAX_CASCADE_STEPS {
            warn!("cascade step limit hit, deferring remaining inputs to outbox");
            outputs.entity_outbox.push(input);
            outputs.entity_outbox.extend(queue.drain(..));
            break;
        }
        if input.is_empty() {
            continue;
        }
        match env.resolve_destination(&mut input) {
            Some(key) => {
                let out = with_replica(env, &key, |replica, ctx| replica.process_input(input, ctx));
                absorb(env, out, queue, outputs);
            }
            None => outputs.entity_outbox.push(input),
        }
    }
}

/// Run `f` on one replica with a context borrowed from the env's signer
/// directory and encryption table.
fn with_replica<F>(env: &mut Env, key: &str, f: F) -> xln_consensus::ReplicaOutputs
where
    F: FnOnce(&mut EntityReplica, &ReplicaCtx<'_>) -> xln_consensus::ReplicaOutputs,
{
    let Some(replica) = env.replicas.get_mut(key) else {
        return xln_consensus::ReplicaOutputs::default();
    };
    let ctx = ReplicaCtx {
        now: env.timestamp,
        keypair: env.signers.get(&replica.signer_id),
        encryption: env.encryption.get(&replica.entity_id),
        signer_pubkeys: &env.signer_pubkeys,
        depository: env.config.depository_address.clone().unwrap_or_default(),
        require_sealed_onions: env.config.require_sealed_onions,
    };
    f(replica, &ctx)
}

fn absorb(
    env: &mut Env,
    out: xln_consensus::ReplicaOutputs,
    queue: &mut VecDeque<EntityInput>,
    outputs: &mut StepOutputs,
) {
    for profile in out.gossip {
        env.gossip.announce(profile.clone());
        outputs.gossip.push(profile);
    }
    queue.extend(out.outputs);
}
