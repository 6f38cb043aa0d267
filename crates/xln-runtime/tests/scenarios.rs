//! End-to-end scenarios over the deterministic runtime: reserve moves
//! through the jurisdiction, bilateral payments on credit, multi-hop HTLC
//! routing, simultaneous-proposal resolution, and batch settlement.
//!
//! Time is injected; every tick seals one embedded-jurisdiction block.

use std::collections::BTreeMap;

use ethnum::{I256, U256};

use xln_core::{
    AccountTx, ConsensusConfig, EntityId, EntityInput, EntityTx, KyberPublicKey, RuntimeConfig,
    Secret, SettlementOp,
};
use xln_crypto::{EncryptionKeyPair, KeyPair};
use xln_jwatch::{ingest_block, EmbeddedJurisdiction};
use xln_runtime::{
    build_htlc_payment, decode_snapshot_str, snapshot_string, step, validate_env, Env,
    RuntimeInput, RuntimeTx,
};

const TOKEN: u32 = 1;

struct Net {
    env: Env,
    chain: EmbeddedJurisdiction,
    now: u64,
}

fn entity(n: u64) -> EntityId {
    EntityId::from_number(n)
}

fn signer_of(n: u64) -> String {
    format!("s{n}")
}

impl Net {
    /// Single-signer entities `#n [sn]`, all hosted by one runtime.
    fn new(entities: &[u64]) -> Self {
        let config = RuntimeConfig {
            depository_address: Some("0xdepository".to_string()),
            ..Default::default()
        };
        let mut env = Env::new(config, xln_core::Hash32::from_bytes([7u8; 32]));

        let mut imports = Vec::new();
        for n in entities {
            let signer = signer_of(*n);
            env.register_signer(signer.clone(), KeyPair::generate());
            env.register_encryption(entity(*n), EncryptionKeyPair::generate());
            imports.push(RuntimeTx::ImportReplica {
                entity_id: entity(*n),
                signer_id: signer,
                config: ConsensusConfig::single(signer_of(*n)),
            });
        }
        let mut net = Net { env, chain: EmbeddedJurisdiction::new(), now: 10_000 };
        net.tick_with(imports, Vec::new());
        net
    }

    fn tick_with(&mut self, runtime_txs: Vec<RuntimeTx>, mut inputs: Vec<EntityInput>) {
        self.now += 1_000;
        let block = self.chain.produce_block();
        let entities = self.env.local_entities();
        inputs.extend(ingest_block(&block, &entities));
        let outputs = step(
            &mut self.env,
            RuntimeInput { now: self.now, runtime_txs, entity_inputs: inputs },
        );
        assert!(outputs.entity_outbox.is_empty(), "all replicas are local");
        for batch in outputs.j_batches {
            self.chain.submit_batch(batch);
        }
    }

    fn tick(&mut self) {
        self.tick_with(Vec::new(), Vec::new());
    }

    fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    fn submit(&mut self, from: u64, txs: Vec<EntityTx>) {
        let input = EntityInput::txs(entity(from), signer_of(from), txs);
        self.tick_with(Vec::new(), vec![input]);
    }

    /// Submit to several entities in the same tick (collision scenarios).
    fn submit_many(&mut self, batches: Vec<(u64, Vec<EntityTx>)>) {
        let inputs = batches
            .into_iter()
            .map(|(n, txs)| EntityInput::txs(entity(n), signer_of(n), txs))
            .collect();
        self.tick_with(Vec::new(), inputs);
    }

    fn replica(&self, n: u64) -> &xln_consensus::EntityReplica {
        self.env
            .replica(&entity(n), &signer_of(n))
            .unwrap_or_else(|| panic!("replica #{n} missing"))
    }

    fn account(&self, owner: u64, peer: u64) -> &xln_account::AccountMachine {
        self.replica(owner)
            .state
            .accounts
            .get(&entity(peer))
            .unwrap_or_else(|| panic!("account #{owner}→#{peer} missing"))
    }

    fn reserve(&self, n: u64) -> U256 {
        self.replica(n).state.reserve(TOKEN)
    }

    fn assert_sound(&self) {
        let violations = validate_env(&self.env);
        assert!(violations.is_empty(), "invariant violations: {violations:?}");
    }

    /// Open the #a↔#b account and extend `credit` to each side.
    fn open_with_credit(&mut self, a: u64, b: u64, credit: i64) {
        self.submit(a, vec![EntityTx::OpenAccount { peer: entity(b) }]);
        self.ticks(2);
        let (left, _) = xln_core::canonical_pair(entity(a), entity(b));
        let a_is_left = entity(a) == left;
        self.submit(
            a,
            vec![EntityTx::AccountTx {
                peer: entity(b),
                tx: AccountTx::SetCreditLimit {
                    token_id: TOKEN,
                    amount: I256::from(credit),
                    creditor_is_left: a_is_left,
                },
            }],
        );
        self.ticks(2);
        self.submit(
            b,
            vec![EntityTx::AccountTx {
                peer: entity(a),
                tx: AccountTx::SetCreditLimit {
                    token_id: TOKEN,
                    amount: I256::from(credit),
                    creditor_is_left: !a_is_left,
                },
            }],
        );
        self.ticks(3);
    }

    fn encryption_keys(&self) -> BTreeMap<EntityId, KyberPublicKey> {
        self.env
            .encryption
            .iter()
            .map(|(entity, keys)| (*entity, keys.public_key.clone()))
            .collect()
    }
}

// ── S1: reserve transfer through the jurisdiction ────────────────────────────

#[test]
fn s1_reserve_transfer() {
    let mut net = Net::new(&[1, 2]);
    let eth = U256::from(10u128.pow(18));

    net.chain.mint(entity(1), TOKEN, U256::from(100u8) * eth);
    net.tick();
    assert_eq!(net.reserve(1), U256::from(100u8) * eth);

    net.chain.transfer(entity(1), entity(2), TOKEN, eth).unwrap();
    net.tick();

    assert_eq!(net.reserve(1), U256::from(99u8) * eth);
    assert_eq!(net.reserve(2), eth);
    net.assert_sound();
}

// ── S2: direct payment on credit ─────────────────────────────────────────────

#[test]
fn s2_direct_payment_with_credit() {
    let mut net = Net::new(&[1, 2]);
    net.open_with_credit(1, 2, 1_000_000);

    net.submit(
        1,
        vec![EntityTx::DirectPayment {
            peer: entity(2),
            token_id: TOKEN,
            amount: I256::from(50_000),
        }],
    );
    net.ticks(4);

    // Sender's position is +50_000 (owed to peer), receiver's the mirror.
    assert_eq!(net.account(1, 2).net_outflow(TOKEN), I256::from(50_000));
    assert_eq!(net.account(2, 1).net_outflow(TOKEN), I256::from(-50_000));
    assert_eq!(
        net.account(1, 2).net_outflow(TOKEN) + net.account(2, 1).net_outflow(TOKEN),
        I256::ZERO
    );
    // Both ends agree on the committed frame.
    assert_eq!(
        net.account(1, 2).current_frame.hash(),
        net.account(2, 1).current_frame.hash()
    );
    net.assert_sound();
}

// ── S3: three-hop HTLC with the 1-bp fee ladder ──────────────────────────────

#[test]
fn s3_three_hop_htlc() {
    let mut net = Net::new(&[1, 2, 3, 4]);
    net.open_with_credit(1, 2, 20_000_000);
    net.open_with_credit(2, 3, 20_000_000);
    net.open_with_credit(3, 4, 20_000_000);

    let secret = Secret::from_bytes([42u8; 32]);
    let route = vec![entity(1), entity(2), entity(3), entity(4)];
    let payment = build_htlc_payment(
        &route,
        TOKEN,
        I256::from(10_000_000),
        &secret,
        &net.encryption_keys(),
    )
    .unwrap();

    net.submit(1, vec![payment]);
    net.ticks(6);

    // Sender paid the full amount; each hop kept its fee; B received the
    // laddered remainder.
    assert_eq!(net.account(1, 2).net_outflow(TOKEN), I256::from(10_000_000));
    assert_eq!(net.account(4, 3).net_outflow(TOKEN), I256::from(-9_999_800));
    // H1 earned 100, H2 earned 99 + the rounding point.
    let h1_earned =
        -net.account(2, 1).net_outflow(TOKEN) - net.account(2, 3).net_outflow(TOKEN);
    let h2_earned =
        -net.account(3, 2).net_outflow(TOKEN) - net.account(3, 4).net_outflow(TOKEN);
    assert_eq!(h1_earned, I256::from(100));
    assert_eq!(h2_earned, I256::from(100));

    // Every lock settled; the sender saw its payment resolve.
    for (a, b) in [(1u64, 2u64), (2, 3), (3, 4)] {
        assert!(net.account(a, b).locks.is_empty());
        assert!(net.account(b, a).locks.is_empty());
    }
    assert!(net
        .replica(1)
        .state
        .messages
        .iter()
        .any(|m| m.starts_with("paymentResolved:")));
    net.assert_sound();
}

// ── S4: right-wins collision ─────────────────────────────────────────────────

#[test]
fn s4_right_wins_collision() {
    let mut net = Net::new(&[3, 4]);
    net.open_with_credit(3, 4, 1_000_000);

    // Both ends push a payment in the same tick: both propose the same
    // account height.
    net.submit_many(vec![
        (
            3,
            vec![EntityTx::DirectPayment {
                peer: entity(4),
                token_id: TOKEN,
                amount: I256::from(10),
            }],
        ),
        (
            4,
            vec![EntityTx::DirectPayment {
                peer: entity(3),
                token_id: TOKEN,
                amount: I256::from(20),
            }],
        ),
    ]);
    net.ticks(5);

    // Left (#3) rolled back exactly once; right never did.
    assert_eq!(net.account(3, 4).rollback_count, 1);
    assert_eq!(net.account(4, 3).rollback_count, 0);
    assert_eq!(
        net.account(3, 4).rollback_count,
        net.account(4, 3).rollback_count + 1
    );

    // Both payments still landed: #3 net = -10 + 20 = +10 inbound.
    assert_eq!(net.account(3, 4).net_outflow(TOKEN), I256::from(-10));
    assert_eq!(net.account(4, 3).net_outflow(TOKEN), I256::from(10));
    assert_eq!(
        net.account(3, 4).current_frame.hash(),
        net.account(4, 3).current_frame.hash()
    );
    net.assert_sound();
}

// ── S5: jurisdiction batch flush ─────────────────────────────────────────────

#[test]
fn s5_j_batch_flush() {
    let mut net = Net::new(&[1, 2]);
    net.chain.mint(entity(1), TOKEN, U256::from(10_000u32));
    net.tick();
    net.open_with_credit(1, 2, 1_000);

    // Two reserve-to-reserve transfers plus one settlement proposal.
    net.submit(
        1,
        vec![
            EntityTx::ReserveTransfer { to: entity(2), token_id: TOKEN, amount: U256::from(5u8) },
            EntityTx::ReserveTransfer { to: entity(2), token_id: TOKEN, amount: U256::from(7u8) },
            EntityTx::ProposeSettlement {
                peer: entity(2),
                ops: vec![SettlementOp::R2c { token_id: TOKEN, amount: I256::from(400) }],
            },
        ],
    );

    // Enough ticks for: settlement accept round-trip, crontab flush at the
    // 5 s cadence, chain execution, and the event round-trip home. The
    // heartbeat chats keep entity-local time moving between frames.
    for i in 0..12 {
        net.submit(1, vec![EntityTx::Chat { from: signer_of(1), message: format!("hb{i}") }]);
    }

    let r1 = net.replica(1);
    assert!(
        r1.state.messages.iter().any(|m| m.starts_with("BATCH_BROADCAST: 0x")),
        "broadcast echo missing: {:?}",
        r1.state.messages
    );
    assert!(r1.state.j_batch.is_empty(), "batch should have drained");

    // Chain state reflects the batch.
    assert_eq!(net.chain.reserve(entity(1), TOKEN), U256::from(10_000u32 - 5 - 7 - 400));
    assert_eq!(net.chain.reserve(entity(2), TOKEN), U256::from(12u8));
    assert_eq!(net.chain.collateral(entity(1), entity(2), TOKEN), U256::from(400u32));

    // Replicas heard the events back.
    assert_eq!(net.reserve(1), U256::from(10_000u32 - 5 - 7 - 400));
    assert_eq!(net.reserve(2), U256::from(12u8));
    let machine = net.account(1, 2);
    assert_eq!(machine.deltas.get(&TOKEN).unwrap().collateral, I256::from(400));
    assert_eq!(machine.deltas.get(&TOKEN).unwrap().ondelta, I256::from(400));
    assert!(net.replica(1).state.last_finalized_j_height > 0);
    net.assert_sound();
}

// ── Gossip: profile announcement feeds the pathfinder ────────────────────────

#[test]
fn profiles_announce_and_route() {
    let mut net = Net::new(&[1, 2, 3]);

    // #1 and #2 advertise capacity along 1 → 2 → 3.
    for (n, peer, capacity) in [(1u64, 2u64, 500u64), (2, 3, 400)] {
        let mut profile = xln_core::Profile::new(entity(n), net.now + 1);
        let mut snapshot = xln_core::AccountSnapshot::default();
        snapshot.token_capacities.insert(
            TOKEN,
            xln_core::TokenCapacity {
                in_capacity: U256::ZERO,
                out_capacity: U256::from(capacity),
            },
        );
        profile.accounts.insert(entity(peer), snapshot);
        net.submit(n, vec![EntityTx::SetProfile { profile }]);
    }
    net.ticks(2);

    assert_eq!(net.env.gossip.len(), 2);
    let route = xln_gossip::find_paths(
        &net.env.gossip,
        entity(1),
        entity(3),
        U256::from(300u32),
        TOKEN,
    );
    assert_eq!(route, vec![entity(1), entity(2), entity(3)]);

    // Asking beyond the thinnest edge finds nothing.
    let blocked = xln_gossip::find_paths(
        &net.env.gossip,
        entity(1),
        entity(3),
        U256::from(450u32),
        TOKEN,
    );
    assert!(blocked.is_empty());
}

// ── Determinism: snapshot round-trip and replayed ticks ──────────────────────

#[test]
fn snapshot_round_trips_bit_for_bit() {
    let mut net = Net::new(&[1, 2]);
    net.open_with_credit(1, 2, 1_000);

    let snap = snapshot_string(&net.env).unwrap();
    let decoded = decode_snapshot_str(&snap).unwrap();
    let snap2 = snapshot_string(&decoded).unwrap();
    assert_eq!(snap, snap2);
}

#[test]
fn identical_inputs_produce_identical_envs() {
    let mut net = Net::new(&[1, 2]);
    net.open_with_credit(1, 2, 1_000_000);

    // Fork the world: same env, same chain.
    let snap = snapshot_string(&net.env).unwrap();
    let mut fork = Net {
        env: decode_snapshot_str(&snap).unwrap(),
        chain: net.chain.clone(),
        now: net.now,
    };

    for world in [&mut net, &mut fork] {
        world.submit(
            1,
            vec![EntityTx::DirectPayment {
                peer: entity(2),
                token_id: TOKEN,
                amount: I256::from(123),
            }],
        );
        world.ticks(3);
    }

    assert_eq!(
        snapshot_string(&net.env).unwrap(),
        snapshot_string(&fork.env).unwrap()
    );
}
