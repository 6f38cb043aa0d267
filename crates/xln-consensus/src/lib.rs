//! Entity consensus: a proposer-based BFT state machine producing ordered
//! frames from a mempool of transactions, with weighted precommit
//! aggregation and round-robin proposer demotion as the only liveness path.

pub mod apply;
pub mod replica;
pub mod state;

pub use apply::{apply_entity_tx, post_frame_hooks, ApplyOutcome, EntityApplyCtx};
pub use replica::{EntityReplica, LockedFrame, ProposalState, ReplicaCtx, ReplicaOutputs};
pub use state::{DebtRecord, EntityState, HtlcRoute, Proposal};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use xln_core::{
        ConsensusConfig, ConsensusMode, DilithiumPublicKey, EntityId, EntityInput, EntityTx,
        SignerId,
    };
    use xln_crypto::KeyPair;

    struct Quorum {
        replicas: Vec<EntityReplica>,
        keys: BTreeMap<SignerId, KeyPair>,
        pubkeys: BTreeMap<SignerId, DilithiumPublicKey>,
    }

    fn quorum(entity: u64, signers: &[&str], threshold: u64) -> Quorum {
        let mut shares = BTreeMap::new();
        let mut keys = BTreeMap::new();
        let mut pubkeys = BTreeMap::new();
        for s in signers {
            shares.insert(s.to_string(), 1);
            let kp = KeyPair::generate();
            pubkeys.insert(s.to_string(), kp.public_key.clone());
            keys.insert(s.to_string(), kp);
        }
        let config = ConsensusConfig {
            mode: ConsensusMode::ProposerBased,
            threshold,
            validators: signers.iter().map(|s| s.to_string()).collect(),
            shares,
            jurisdiction: None,
        };
        let replicas = signers
            .iter()
            .map(|s| EntityReplica::new(EntityId::from_number(entity), *s, config.clone()).unwrap())
            .collect();
        Quorum { replicas, keys, pubkeys }
    }

    fn mk_ctx<'a>(
        keys: &'a BTreeMap<SignerId, KeyPair>,
        pubkeys: &'a BTreeMap<SignerId, DilithiumPublicKey>,
        signer: &SignerId,
        now: u64,
    ) -> ReplicaCtx<'a> {
        ReplicaCtx {
            now,
            keypair: keys.get(signer),
            encryption: None,
            signer_pubkeys: pubkeys,
            depository: "0xdep".to_string(),
            require_sealed_onions: false,
        }
    }

    impl Quorum {
        /// Route same-entity inputs among the replicas until quiescent;
        /// returns cross-entity outputs.
        fn settle(&mut self, now: u64) -> Vec<EntityInput> {
            let mut external = Vec::new();
            let mut pending: Vec<EntityInput> = Vec::new();
            for i in 0..self.replicas.len() {
                let signer = self.replicas[i].signer_id.clone();
                let ctx = mk_ctx(&self.keys, &self.pubkeys, &signer, now);
                let out = self.replicas[i].tick(&ctx);
                pending.extend(out.outputs);
            }
            for _ in 0..8 {
                if pending.is_empty() {
                    break;
                }
                let mut next = Vec::new();
                for input in pending.drain(..) {
                    if let Some(idx) =
                        self.replicas.iter().position(|r| r.signer_id == input.signer_id)
                    {
                        let signer = self.replicas[idx].signer_id.clone();
                        let ctx = mk_ctx(&self.keys, &self.pubkeys, &signer, now);
                        next.extend(self.replicas[idx].process_input(input, &ctx).outputs);
                    } else {
                        external.push(input);
                    }
                }
                pending = next;
            }
            external
        }
    }

    #[test]
    fn single_signer_commits_immediately() {
        let mut q = quorum(1, &["s1"], 1);
        q.replicas[0]
            .enqueue_tx(EntityTx::Chat { from: "s1".into(), message: "hello".into() })
            .unwrap();
        q.settle(1_000);
        assert_eq!(q.replicas[0].state.height, 1);
        assert_eq!(q.replicas[0].state.messages, vec!["s1: hello".to_string()]);
        assert!(q.replicas[0].mempool.is_empty());
    }

    #[test]
    fn three_validator_quorum_converges() {
        let mut q = quorum(1, &["s1", "s2", "s3"], 2);
        // s1 is the static proposer.
        assert!(q.replicas[0].is_proposer());
        assert!(!q.replicas[1].is_proposer());

        q.replicas[0]
            .enqueue_tx(EntityTx::Chat { from: "s1".into(), message: "gm".into() })
            .unwrap();
        q.settle(1_000);

        for replica in &q.replicas {
            assert_eq!(replica.state.height, 1, "replica {} lagging", replica.signer_id);
            assert_eq!(replica.state.messages, vec!["s1: gm".to_string()]);
            assert_eq!(replica.state.last_frame_hash, q.replicas[0].state.last_frame_hash);
        }
    }

    #[test]
    fn replica_states_hash_identically() {
        let mut q = quorum(1, &["s1", "s2", "s3"], 2);
        for m in ["a", "b", "c"] {
            q.replicas[0]
                .enqueue_tx(EntityTx::Chat { from: "s1".into(), message: m.into() })
                .unwrap();
            q.settle(1_000);
        }
        let h0 = q.replicas[0].state.hash();
        assert!(q.replicas.iter().all(|r| r.state.hash() == h0));
        assert_eq!(q.replicas[0].state.height, 3);
    }

    #[test]
    fn mempool_overflow_rejected() {
        let mut q = quorum(1, &["s1", "s2"], 2);
        // Non-proposer never drains its queue by itself.
        let replica = &mut q.replicas[1];
        for i in 0..xln_core::MEMPOOL_SIZE {
            replica
                .enqueue_tx(EntityTx::Chat { from: "s2".into(), message: format!("{i}") })
                .unwrap();
        }
        let err = replica
            .enqueue_tx(EntityTx::Chat { from: "s2".into(), message: "overflow".into() })
            .unwrap_err();
        assert_eq!(err.code(), "MEMPOOL_FULL");
    }

    #[test]
    fn proposal_timeout_rotates_proposer() {
        let mut q = quorum(1, &["s1", "s2"], 2);
        q.replicas[0]
            .enqueue_tx(EntityTx::Chat { from: "s1".into(), message: "stuck".into() })
            .unwrap();

        // Propose at t=0, but never deliver the precommit.
        let signer = q.replicas[0].signer_id.clone();
        let ctx = mk_ctx(&q.keys, &q.pubkeys, &signer, 0);
        let out = q.replicas[0].tick(&ctx);
        assert!(!out.outputs.is_empty());
        assert!(q.replicas[0].proposal.is_some());

        // Past PROPOSAL_TIMEOUT_MS the proposer demotes itself.
        let ctx = mk_ctx(&q.keys, &q.pubkeys, &signer, xln_core::PROPOSAL_TIMEOUT_MS + 1);
        q.replicas[0].tick(&ctx);
        assert!(q.replicas[0].proposal.is_none());
        assert!(!q.replicas[0].is_proposer());
        assert_eq!(q.replicas[0].proposer_index, 1);
        // The queued tx survives for the next proposer round.
        assert_eq!(q.replicas[0].mempool.len(), 1);
    }
}
